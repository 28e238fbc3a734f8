//! Repository configuration and the policies derived from it.

mod config;
mod policy;

pub use config::{RepositoryConfig, RepositoryConfigBuilder};
pub use policy::{
    HostPolicy, RefFilter, RepositoryPolicy, SelectorPolicy, TrustPolicy, short_ref_name,
};
