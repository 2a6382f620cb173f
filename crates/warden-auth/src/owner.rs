//! Default owner computation.

use warden_core::{Identity, RequestContext};

/// Owner to assign to a new object when the creator named none.
///
/// The first present value wins: the token's default owner, the user's
/// default owner, then the user itself. Anonymous requests get `None`.
pub fn default_owner_for(ctx: &RequestContext) -> Option<&str> {
    ctx.identity().map(identity_default_owner)
}

fn identity_default_owner(identity: &Identity) -> &str {
    identity
        .authorization
        .default_owner_uuid
        .as_deref()
        .or(identity.user.default_owner_uuid.as_deref())
        .unwrap_or(&identity.user.uuid)
}
