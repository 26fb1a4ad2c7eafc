//! Campus - offline-first client core for a university student portal
//!
//! Keeps a local, queryable copy of a student's notices, timetable, exams,
//! calendar events and subjects in sync with the university API, manages the
//! OAuth2 session that API requires, and hosts a purely local grade book.

pub mod api;
pub mod auth;
pub mod config;
pub mod credentials;
pub mod grades;
pub mod model;
pub mod portal;
pub mod storage;
pub mod sync;
pub mod trigger;
