pub mod audit;
pub mod dashboard;
pub mod installments;
pub mod lotes;
pub mod passwords;
pub mod receipts;
pub mod reports;
pub mod sales;
pub mod scheduler;
pub mod urgency;
