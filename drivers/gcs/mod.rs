//! Google Cloud Storage driver (JSON API) / GCS 驱动

mod auth;
mod driver;
mod factory;

pub use auth::{ServiceAccountKey, TokenProvider};
pub use driver::GcsDriver;
pub use factory::GcsDriverFactory;
