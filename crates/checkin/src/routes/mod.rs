//! API route handlers

pub mod checkin;
