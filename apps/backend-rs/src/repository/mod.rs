pub mod lotes;
pub mod reports;
pub mod sales;
pub mod schedules;
pub mod table_service;
