//! 交易日历

pub mod weekday_calendar;

pub use weekday_calendar::WeekdayCalendar;
