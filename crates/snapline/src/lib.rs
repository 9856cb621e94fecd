//! Top-level facade crate for snapline.
//!
//! Re-exports the shared types, the wire layer, the plugin runtime and the
//! control-side clients so users can depend on a single crate.

pub mod core {
    pub use snapline_core::*;
}

pub mod rpc {
    pub use snapline_rpc::*;
}

pub mod plugin {
    pub use snapline_plugin::*;
}

pub mod control {
    pub use snapline_control::*;
}
