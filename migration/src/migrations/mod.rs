pub mod m202610010001_create_handins;
pub mod m202610010002_create_dispatch_outbox;
