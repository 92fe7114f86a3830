#![allow(dead_code)]

pub mod cluster;

pub use cluster::{Cluster, Participant, wait_until};
