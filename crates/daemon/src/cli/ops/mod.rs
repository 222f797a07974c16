pub mod init;
pub mod products;
pub mod purge;
pub mod session;
pub mod snapshot;
pub mod status;
pub mod submit;
pub mod sync;
pub mod watch;

pub use init::Init;
pub use products::Products;
pub use purge::Purge;
pub use session::Session;
pub use snapshot::Snapshot;
pub use status::Status;
pub use submit::Submit;
pub use sync::Replay;
pub use watch::Watch;
