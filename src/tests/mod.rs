//! End-to-end scenarios exercising the sharding engine as a whole,
//! against the in-process `MemChild` collaborator.

mod scenarios_test;
