pub mod location;
pub mod role;
pub mod time_entry;
pub mod user;
pub mod vacation_request;
