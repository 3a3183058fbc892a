//! Push synchronization
//!
//! Opens one change-feed subscription per scope and folds its events into a
//! locally held [`Collection`]:
//! - profile / owner-video updates overlay the changed fields onto the record
//!   with the same id (owner grids are re-sorted afterwards)
//! - any story change re-fetches the owner's active stories
//! - message inserts are appended when they belong to the open pair
//! - any message insert touching the viewer rebuilds the inbox
//!
//! Handles must be closed explicitly. Closing clears the handle's open flag
//! under the target collection's lock, so nothing is applied afterwards even
//! if an event was already being handled.

mod collection;

pub(crate) use collection::dedupe;
pub use collection::{overlay, Collection, MergeOutcome};

use crate::domain::{Conversation, Message, Profile, Story, Video};
use crate::error::ServiceResult;
use crate::remote::{DataService, Table};
use crate::repository::{MessageRepository, StoryRepository};
use crate::services::engagement::EngagementStore;
use crate::services::inbox::project_conversations;
use change_feed::{ChangeEvent, ChangeFeed, ChangeKind, ChannelScope, RowFilter};
use chrono::Utc;
use collection::merge_into;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// What a subscription listens to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncScope {
    Profile(Uuid),
    OwnerVideos(Uuid),
    OwnerStories(Uuid),
    Conversation { me: Uuid, partner: Uuid },
    Inbox(Uuid),
}

impl SyncScope {
    /// Change-feed scope; pair and inbox scopes are filtered further on receipt
    pub fn channel(&self) -> ChannelScope {
        match self {
            SyncScope::Profile(id) => ChannelScope::table(Table::Profiles.as_str())
                .with_filter(RowFilter::eq("id", id))
                .only(ChangeKind::Update),
            SyncScope::OwnerVideos(owner) => ChannelScope::table(Table::Videos.as_str())
                .with_filter(RowFilter::eq("user_id", owner))
                .only(ChangeKind::Update),
            SyncScope::OwnerStories(owner) => ChannelScope::table(Table::Stories.as_str())
                .with_filter(RowFilter::eq("user_id", owner)),
            SyncScope::Conversation { .. } | SyncScope::Inbox(_) => {
                ChannelScope::table(Table::Messages.as_str()).only(ChangeKind::Insert)
            }
        }
    }
}

impl std::fmt::Display for SyncScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncScope::Profile(id) => write!(f, "profile:{}", id),
            SyncScope::OwnerVideos(id) => write!(f, "videos:{}", id),
            SyncScope::OwnerStories(id) => write!(f, "stories:{}", id),
            SyncScope::Conversation { me, partner } => write!(f, "chat:{}:{}", me, partner),
            SyncScope::Inbox(id) => write!(f, "inbox:{}", id),
        }
    }
}

/// A scope together with the collection its events land in
pub enum SyncBinding {
    Profile {
        profile_id: Uuid,
        target: Collection<Profile>,
    },
    OwnerVideos {
        owner_id: Uuid,
        target: Collection<Video>,
    },
    OwnerStories {
        owner_id: Uuid,
        target: Collection<Story>,
    },
    Conversation {
        me: Uuid,
        partner: Uuid,
        target: Collection<Message>,
    },
    Inbox {
        me: Uuid,
        target: Collection<Conversation>,
    },
}

impl SyncBinding {
    pub fn scope(&self) -> SyncScope {
        match self {
            SyncBinding::Profile { profile_id, .. } => SyncScope::Profile(*profile_id),
            SyncBinding::OwnerVideos { owner_id, .. } => SyncScope::OwnerVideos(*owner_id),
            SyncBinding::OwnerStories { owner_id, .. } => SyncScope::OwnerStories(*owner_id),
            SyncBinding::Conversation { me, partner, .. } => SyncScope::Conversation {
                me: *me,
                partner: *partner,
            },
            SyncBinding::Inbox { me, .. } => SyncScope::Inbox(*me),
        }
    }
}

/// Event handler for one open scope
#[derive(Clone)]
enum Applier {
    Profile {
        target: Collection<Profile>,
        engagement: Option<Arc<EngagementStore>>,
    },
    Videos {
        target: Collection<Video>,
        engagement: Option<Arc<EngagementStore>>,
    },
    Stories {
        owner_id: Uuid,
        target: Collection<Story>,
        stories: StoryRepository,
    },
    Conversation {
        me: Uuid,
        partner: Uuid,
        target: Collection<Message>,
    },
    Inbox {
        me: Uuid,
        target: Collection<Conversation>,
        messages: MessageRepository,
    },
}

fn row_id(row: &Value) -> Option<Uuid> {
    row.get("id")
        .and_then(Value::as_str)
        .and_then(|s| Uuid::parse_str(s).ok())
}

fn decode<T: serde::de::DeserializeOwned>(event: &ChangeEvent) -> Option<T> {
    match serde_json::from_value(event.new_row.clone()) {
        Ok(item) => Some(item),
        Err(e) => {
            warn!(table = %event.table, error = %e, "Skipping malformed change payload");
            None
        }
    }
}

impl Applier {
    fn fence(&self, open: &AtomicBool) {
        match self {
            Applier::Profile { target, .. } => target.fence(open),
            Applier::Videos { target, .. } => target.fence(open),
            Applier::Stories { target, .. } => target.fence(open),
            Applier::Conversation { target, .. } => target.fence(open),
            Applier::Inbox { target, .. } => target.fence(open),
        }
    }

    async fn apply(&self, event: ChangeEvent, open: &AtomicBool) {
        match self {
            Applier::Profile { target, engagement } => {
                let Some(id) = row_id(&event.new_row) else {
                    warn!(table = %event.table, "Profile update without id, skipping");
                    return;
                };
                let mut outcome = MergeOutcome::Missing;
                target.mutate_if(open, |items| merge_into(items, id, &event.new_row, &mut outcome));
                if let (MergeOutcome::Merged(profile), Some(store)) = (&outcome, engagement) {
                    store.sync_profile(profile);
                }
            }
            Applier::Videos { target, engagement } => {
                let Some(id) = row_id(&event.new_row) else {
                    warn!(table = %event.table, "Video update without id, skipping");
                    return;
                };
                let mut outcome = MergeOutcome::Missing;
                target.mutate_if(open, |items| {
                    let changed = merge_into(items, id, &event.new_row, &mut outcome);
                    if changed {
                        items.sort_by(Video::grid_order);
                    }
                    changed
                });
                if let (MergeOutcome::Merged(video), Some(store)) = (&outcome, engagement) {
                    store.sync_item(video);
                }
            }
            Applier::Stories {
                owner_id,
                target,
                stories,
            } => {
                debug!(owner_id = %owner_id, kind = %event.kind, "Story change, re-fetching");
                match stories.active_for(*owner_id, Utc::now()).await {
                    Ok(fresh) => {
                        target.mutate_if(open, |items| {
                            *items = fresh;
                            true
                        });
                    }
                    Err(e) => warn!(owner_id = %owner_id, error = %e, "Failed to re-fetch stories"),
                }
            }
            Applier::Conversation {
                me,
                partner,
                target,
            } => {
                let Some(message) = decode::<Message>(&event) else {
                    return;
                };
                if !message.is_between(*me, *partner) {
                    return;
                }
                target.mutate_if(open, |items| {
                    if items.iter().any(|m| m.id == message.id) {
                        false
                    } else {
                        items.push(message);
                        true
                    }
                });
            }
            Applier::Inbox {
                me,
                target,
                messages,
            } => {
                let Some(message) = decode::<Message>(&event) else {
                    return;
                };
                if !message.involves(*me) {
                    return;
                }
                match messages.involving(*me).await {
                    Ok(all) => {
                        let conversations = project_conversations(*me, &all);
                        target.mutate_if(open, |items| {
                            *items = conversations;
                            true
                        });
                    }
                    Err(e) => warn!(user_id = %me, error = %e, "Failed to rebuild inbox"),
                }
            }
        }
    }
}

/// Open subscription; pass it back to [`SyncLayer::close`]
pub struct SubscriptionHandle {
    id: Uuid,
    scope: SyncScope,
    open: Arc<AtomicBool>,
    applier: Applier,
    task: Option<JoinHandle<()>>,
}

impl SubscriptionHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn scope(&self) -> SyncScope {
        self.scope
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn shutdown(&mut self) {
        self.applier.fence(&self.open);
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

pub struct SyncLayer {
    feed: Arc<dyn ChangeFeed>,
    stories: StoryRepository,
    messages: MessageRepository,
    engagement: Option<Arc<EngagementStore>>,
}

impl SyncLayer {
    pub fn new(feed: Arc<dyn ChangeFeed>, remote: Arc<dyn DataService>) -> Self {
        Self {
            feed,
            stories: StoryRepository::new(remote.clone()),
            messages: MessageRepository::new(remote),
            engagement: None,
        }
    }

    /// Forward merged videos and profiles to the engagement store
    pub fn with_engagement(mut self, engagement: Arc<EngagementStore>) -> Self {
        self.engagement = Some(engagement);
        self
    }

    fn applier(&self, binding: SyncBinding) -> Applier {
        match binding {
            SyncBinding::Profile { target, .. } => Applier::Profile {
                target,
                engagement: self.engagement.clone(),
            },
            SyncBinding::OwnerVideos { target, .. } => Applier::Videos {
                target,
                engagement: self.engagement.clone(),
            },
            SyncBinding::OwnerStories { owner_id, target } => Applier::Stories {
                owner_id,
                target,
                stories: self.stories.clone(),
            },
            SyncBinding::Conversation {
                me,
                partner,
                target,
            } => Applier::Conversation {
                me,
                partner,
                target,
            },
            SyncBinding::Inbox { me, target } => Applier::Inbox {
                me,
                target,
                messages: self.messages.clone(),
            },
        }
    }

    pub async fn open(&self, binding: SyncBinding) -> ServiceResult<SubscriptionHandle> {
        let scope = binding.scope();
        let mut subscription = self.feed.subscribe(scope.channel()).await?;
        let applier = self.applier(binding);
        let open = Arc::new(AtomicBool::new(true));

        let task = {
            let applier = applier.clone();
            let open = open.clone();
            tokio::spawn(async move {
                while let Some(event) = subscription.next().await {
                    if !open.load(Ordering::SeqCst) {
                        break;
                    }
                    applier.apply(event, &open).await;
                }
                debug!(scope = %scope, "Sync task finished");
            })
        };

        info!(scope = %scope, "Sync subscription opened");
        Ok(SubscriptionHandle {
            id: Uuid::new_v4(),
            scope,
            open,
            applier,
            task: Some(task),
        })
    }

    pub fn close(&self, mut handle: SubscriptionHandle) {
        handle.shutdown();
        info!(scope = %handle.scope, "Sync subscription closed");
    }
}

/// Holds at most one subscription and swaps it when the scope changes
#[derive(Default)]
pub struct SyncSlot {
    current: Option<SubscriptionHandle>,
}

impl SyncSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn scope(&self) -> Option<SyncScope> {
        self.current.as_ref().map(SubscriptionHandle::scope)
    }

    /// Close the current subscription, then open `binding`
    pub async fn switch(&mut self, layer: &SyncLayer, binding: SyncBinding) -> ServiceResult<()> {
        self.clear(layer);
        self.current = Some(layer.open(binding).await?);
        Ok(())
    }

    pub fn clear(&mut self, layer: &SyncLayer) {
        if let Some(handle) = self.current.take() {
            layer.close(handle);
        }
    }
}
