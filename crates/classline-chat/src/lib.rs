pub mod contacts;
pub mod live;
pub mod messages;
pub mod session;
