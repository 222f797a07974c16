mod product;
mod profile;
mod session;
mod snapshot;

pub use product::Product;
pub use profile::Profile;
pub use session::AuthSession;
pub use snapshot::{ServerSnapshot, SnapshotStats};
