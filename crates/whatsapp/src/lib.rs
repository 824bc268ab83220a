pub mod admin;
pub mod cloud;

pub use admin::{AdminApiClient, AdminCustomer, AdminError, AdminOrder};
pub use cloud::{CloudApiClient, CloudApiCredentials, DispatchError};
