pub mod cashfree;
pub mod razorpay;
pub mod stripe;

pub use cashfree::CashfreeGateway;
pub use razorpay::RazorpayGateway;
pub use stripe::{StripeGateway, StripeSignatureHeader};
