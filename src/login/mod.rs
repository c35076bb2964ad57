pub mod flow;
pub mod locale;
pub mod notice;
pub mod policy;
pub mod routes;
