mod broker;
mod dealer;
mod matcher;
mod meta;
mod realm;
mod router;
mod session;

pub use realm::RealmConfig;
pub use router::{
    Router,
    RouterConfig,
};
