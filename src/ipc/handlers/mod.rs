pub mod announcements;
pub mod backup;
pub mod core;
pub mod marks;
pub mod reports;
pub mod students;
pub mod timetable;
