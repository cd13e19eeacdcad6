pub mod model;
pub mod service;

pub use model::{GroupDetails, InviteJoinOutcome, JoinDecision};
pub use service::{GroupDomainService, GroupDraft, PermissionResolver, ReactionService};
