pub mod comments;
pub mod engagement;
pub mod feed;
pub mod inbox;
pub mod scheduler;
pub mod story;
pub mod sync;
pub mod view_accounting;

pub use comments::CommentService;
pub use engagement::{EngagementStore, MutationOutcome};
pub use feed::{DiscoverFeed, HomeFeed, ProfileLoader, ProfilePage};
pub use inbox::InboxService;
pub use scheduler::{FeedScheduler, FeedSource, PlaybackBackend, PlaybackError};
pub use story::{FixedDurationClock, MediaClock, StoryPlayer, StoryState};
pub use sync::{Collection, SubscriptionHandle, SyncBinding, SyncLayer, SyncScope};
pub use view_accounting::{MemorySessionMarkers, SessionMarkerStore, ViewAccounting};
