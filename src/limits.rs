//! Hard limits applied per tenant. Requests exceeding them fail with
//! `EngineError::LimitExceeded` before anything is written to the WAL.

pub const MAX_TENANTS: usize = 1024;
pub const MAX_TENANT_NAME_LEN: usize = 256;

pub const MAX_DRAWS_PER_TENANT: usize = 1_000;
pub const MAX_SUITES_PER_TENANT: usize = 50_000;
pub const MAX_STUDENTS_PER_TENANT: usize = 200_000;
pub const MAX_GROUPS_PER_TENANT: usize = 100_000;

pub const MAX_NAME_LEN: usize = 256;
pub const MAX_LABEL_LEN: usize = 64;

/// Largest suite (and therefore group) capacity.
pub const MAX_GROUP_SIZE: u32 = 16;
pub const MAX_CLIP_GROUPS: usize = 8;
pub const MAX_MEMBERSHIPS_PER_GROUP: usize = 64;
