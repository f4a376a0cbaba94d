// Privacy: onion paths and layered request encryption

pub mod onion;
pub mod path;

pub use onion::{
    build_onion, encrypt_hop, encrypt_payload_for_destination, Destination, OnionBuildingResult,
};
pub use path::OnionPaths;
