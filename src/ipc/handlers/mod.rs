pub mod attendance;
pub mod backup;
pub mod belt_tests;
pub mod core;
pub mod dashboard;
pub mod events;
pub mod fees;
pub mod reports;
pub mod students;
