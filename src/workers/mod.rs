pub mod payment_intake;

pub use payment_intake::{IntakeWorkerConfig, PaymentIntake, PaymentIntakeWorker};
