//! Service logic for the `server_hub` and `server_gateway` binaries.

pub mod gateway_logic;
pub mod hub_logic;
pub mod shared;
