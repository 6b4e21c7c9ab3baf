//! Shared test support: resource builders and an in-memory cluster.

#![allow(dead_code)]

pub mod fixtures;
