pub mod jsonrpc;
pub mod middleware;
pub mod routes;
pub mod types;

pub use routes::permissions as routes_permissions;
pub use routes::system as routes_system;
pub use routes::tasks as routes_tasks;
pub use routes::vm as routes_vm;
