mod client;
pub use client::{Client, ClientError};

mod order;
pub use order::{build_feed, joined_first, FeedEntry, Order, OrderExt, StatsSource};

mod router;
pub use router::{ProfileTab, RouteError, Router, Transition, View};

pub mod api {
    pub use phreddit_api::*;
}

pub mod prelude {
    pub use crate::OrderExt;
}
