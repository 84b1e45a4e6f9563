pub mod error;
pub mod gateway;
pub mod types;
pub mod utils;

pub use error::{PaymentError, PaymentResult};
pub use gateway::{PaymentGateway, VposGatewayClient};
pub use types::{CreatePaymentRequest, CreatePaymentResponse, GatewayPaymentState, GatewayPaymentStatus};
