mod agreement;
mod dispute;
mod event;
mod session;
mod sync_state;
mod user;

pub use agreement::AgreementProvider;
pub use dispute::DisputeProvider;
pub use event::EventLedgerProvider;
pub use session::SessionProvider;
pub use sync_state::SyncStateProvider;
pub use user::UserProvider;
