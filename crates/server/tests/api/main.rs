mod deploy_api;
mod jsonrpc_api;
mod system_api;
mod vm_api;

// -----------------------------------------------------------------------------

mod helpers;
