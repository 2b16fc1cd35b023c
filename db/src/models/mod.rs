pub mod dispatch_outbox;
pub mod handin;

pub use dispatch_outbox::Entity as DispatchOutbox;
pub use handin::Entity as Handin;
