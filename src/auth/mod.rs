pub mod backend;
pub mod extract;
pub mod session;
