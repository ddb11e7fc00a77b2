use serde_json::{Value, json};

const DESCRIPTOR: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<Envelope xmlns="http://schemas.dmtf.org/ovf/envelope/1" xmlns:ovf="http://schemas.dmtf.org/ovf/envelope/1">
  <References>
    <File ovf:href="disk-0.vmdk" ovf:id="file1" ovf:size="2048"/>
  </References>
  <NetworkSection>
    <Info>Logical networks</Info>
    <Network ovf:name="VM Network"/>
  </NetworkSection>
  <VirtualSystem ovf:id="appliance">
    <Info>A virtual machine</Info>
    <Name>appliance</Name>
  </VirtualSystem>
</Envelope>
"#;

/// Builds an OVA holding a descriptor and one disk, both inside a folder as
/// many exporters lay them out.
///
pub fn ova() -> Vec<u8> {
    let mut builder = tar::Builder::new(Vec::new());
    for (name, data) in [
        ("appliance/", &b""[..]),
        ("appliance/appliance.ovf", DESCRIPTOR.as_bytes()),
        ("appliance/disk-0.vmdk", &[1u8; 2048][..]),
    ] {
        let kind = if name.ends_with('/') {
            tar::EntryType::Directory
        } else {
            tar::EntryType::Regular
        };
        let mut header = tar::Header::new_ustar();
        header.set_path(name).unwrap();
        header.set_entry_type(kind);
        header.set_mode(if kind.is_dir() { 0o755 } else { 0o640 });
        header.set_size(data.len() as u64);
        header.set_cksum();
        builder.append(&header, data).unwrap();
    }
    builder.into_inner().unwrap()
}

pub fn deploy(name: &str, ova_url: &str) -> Value {
    json!({
        "name": name,
        "ova_url": ova_url,
        "annotation": "deployed by tests",
        "networks": {"VM Network": "VM Network"}
    })
}
