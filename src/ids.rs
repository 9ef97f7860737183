//! Identity types and the flattened uid encoding.
//!
//! Visibility rules are expressed against an [`AppId`]: one integer per
//! package, shared by every member of a shared user. Each tenant on the
//! device is a [`UserId`], and the pair is flattened into a [`Uid`] by a
//! stable multiply-and-add encoding so that runtime grants and the decision
//! cache can be keyed by a single integer.

/// Identity shared by all co-signed packages that opt into a shared user.
pub type AppId = u32;

/// Tenant identifier on a multi-user device.
pub type UserId = u32;

/// A `(UserId, AppId)` pair flattened into a single integer.
pub type Uid = u32;

/// First identity available to ordinary applications.
///
/// Every identity below this threshold belongs to the platform itself and is
/// unconditionally visible in both directions.
pub const FIRST_APP_ID: AppId = 10_000;

/// Size of the per-user identity range used by the uid encoding.
///
/// The range is deliberately larger than the number of identities ever
/// assigned, which leaves holes in the uid space; anything keyed by uid must
/// therefore be a sparse map, never a dense array.
pub const PER_USER_RANGE: u32 = 100_000;

/// Flatten `(user, app_id)` into a [`Uid`].
#[must_use]
pub const fn uid(user: UserId, app_id: AppId) -> Uid {
    user * PER_USER_RANGE + app_id
}

/// Recover the tenant from a flattened uid.
#[must_use]
pub const fn user_of(uid: Uid) -> UserId {
    uid / PER_USER_RANGE
}

/// Recover the application identity from a flattened uid.
#[must_use]
pub const fn app_id_of(uid: Uid) -> AppId {
    uid % PER_USER_RANGE
}

/// Whether `app_id` belongs to the platform range below [`FIRST_APP_ID`].
#[must_use]
pub const fn is_privileged(app_id: AppId) -> bool {
    app_id < FIRST_APP_ID
}
