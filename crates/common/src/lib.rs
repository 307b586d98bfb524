// storefront-common: shared chat types and wire protocol for the Storefront relay

pub mod protocol;
pub mod types;
