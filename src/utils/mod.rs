pub(crate) mod jwt;
pub mod logging;
