pub mod group_domain_service;
pub mod permission_service;
pub mod reaction_service;

pub use group_domain_service::{GroupDomainService, GroupDraft};
pub use permission_service::{PermissionResolver, is_granted};
pub use reaction_service::ReactionService;
