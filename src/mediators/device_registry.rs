//! `DeviceRegistry` (§4.2): named-device lifecycle per user.
//!
//! Grounded on `account_podcast_subscriber`'s upsert-by-unique-key shape
//! (`ON CONFLICT ... DO UPDATE`), generalized to devices and to the
//! auto-create contract every write path in the other engines relies on.

use crate::errors::*;
use crate::model;
use crate::model::insertable;
use crate::schema::device;
use crate::time_helpers;

use chrono::Utc;
use diesel::pg::PgConnection;
use diesel::prelude::*;
use slog::Logger;

/// Upserts a device by `(user_id, name)`: insert with the given or
/// defaulted kind/caption on miss; on hit, update kind/caption and mark
/// active with a fresh `last_sync`.
pub struct Upserter {
    pub user_id: i64,
    pub name:    String,
    pub kind:    Option<String>,
    pub caption: Option<String>,
}

pub struct UpsertResult {
    pub device: model::Device,
}

impl Upserter {
    pub fn run(&self, log: &Logger, conn: &mut PgConnection) -> Result<UpsertResult> {
        if let Some(ref kind) = self.kind {
            if !model::Device::kind_is_valid(kind) {
                return Err(error::invalid_input(format!("unrecognized device kind: {}", kind)).into());
            }
        }

        time_helpers::log_timed(&log.new(o!("step" => file!())), |log| {
            conn.transaction::<_, Error, _>(|conn| self.run_inner(log, conn))
        })
    }

    fn run_inner(&self, log: &Logger, conn: &mut PgConnection) -> Result<UpsertResult> {
        let now = Utc::now();
        let kind = self.kind.clone().unwrap_or_else(|| "other".to_owned());

        let device = time_helpers::log_timed(&log.new(o!("step" => "upsert_device")), |_log| {
            diesel::insert_into(device::table)
                .values(&insertable::Device {
                    user_id:    self.user_id,
                    name:       self.name.clone(),
                    kind:       kind.clone(),
                    caption:    self.caption.clone(),
                    active:     true,
                    last_sync:  now,
                    created_at: now,
                })
                .on_conflict((device::user_id, device::name))
                .do_update()
                .set((
                    device::kind.eq(kind),
                    device::caption.eq(self.caption.clone()),
                    device::active.eq(true),
                    device::last_sync.eq(now),
                ))
                .get_result(conn)
                .chain_err(|| "error upserting device")
        })?;

        Ok(UpsertResult { device })
    }
}

/// Auto-creates a device by name if it doesn't exist yet (kind `other`),
/// per the "auto-create contract" -- every write path that accepts a
/// device name must never require a separate registration step.
pub fn ensure_device(log: &Logger, conn: &mut PgConnection, user_id: i64, name: &str) -> Result<model::Device> {
    time_helpers::log_timed(&log.new(o!("step" => "ensure_device")), |log| {
        let existing: Option<model::Device> = device::table
            .filter(device::user_id.eq(user_id))
            .filter(device::name.eq(name))
            .first(conn)
            .optional()
            .chain_err(|| "error looking up device")?;

        if let Some(d) = existing {
            return Ok(d);
        }

        Upserter {
            user_id,
            name: name.to_owned(),
            kind: None,
            caption: None,
        }
        .run(log, conn)
        .map(|r| r.device)
    })
}

/// Renames a device; fails `Conflict` if the new name is already in use by
/// another active device for the user.
pub struct Renamer {
    pub user_id:  i64,
    pub old_name: String,
    pub new_name: String,
}

pub struct RenameResult {
    pub device: model::Device,
}

impl Renamer {
    pub fn run(&self, log: &Logger, conn: &mut PgConnection) -> Result<RenameResult> {
        time_helpers::log_timed(&log.new(o!("step" => file!())), |log| {
            conn.transaction::<_, Error, _>(|conn| self.run_inner(log, conn))
        })
    }

    fn run_inner(&self, _log: &Logger, conn: &mut PgConnection) -> Result<RenameResult> {
        if self.old_name != self.new_name {
            let conflict: bool = diesel::select(diesel::dsl::exists(
                device::table
                    .filter(device::user_id.eq(self.user_id))
                    .filter(device::name.eq(&self.new_name))
                    .filter(device::active.eq(true)),
            ))
            .get_result(conn)
            .chain_err(|| "error checking device name conflict")?;

            if conflict {
                return Err(error::conflict(format!("device name already in use: {}", self.new_name)).into());
            }
        }

        let device: model::Device = diesel::update(
            device::table
                .filter(device::user_id.eq(self.user_id))
                .filter(device::name.eq(&self.old_name)),
        )
        .set(device::name.eq(&self.new_name))
        .get_result(conn)
        .optional()
        .chain_err(|| "error renaming device")?
        .ok_or_else(|| Error::from(error::not_found("device", self.old_name.clone())))?;

        Ok(RenameResult { device })
    }
}

/// Soft-deactivates a device (`active <- false`), preserving its change
/// history per §3's "Deactivation is soft" invariant.
pub struct Deactivator {
    pub user_id: i64,
    pub name:    String,
}

impl Deactivator {
    pub fn run(&self, log: &Logger, conn: &mut PgConnection) -> Result<()> {
        time_helpers::log_timed(&log.new(o!("step" => file!())), |_log| {
            diesel::update(
                device::table
                    .filter(device::user_id.eq(self.user_id))
                    .filter(device::name.eq(&self.name)),
            )
            .set(device::active.eq(false))
            .execute(conn)
            .chain_err(|| "error deactivating device")?;
            Ok(())
        })
    }
}

/// Lists every active device for a user, each annotated with the user's
/// current subscription count (shared across all devices, per §3's
/// user-scoped subscription state).
pub fn list_active(conn: &mut PgConnection, user_id: i64) -> Result<Vec<model::Device>> {
    device::table
        .filter(device::user_id.eq(user_id))
        .filter(device::active.eq(true))
        .order(device::name.asc())
        .load(conn)
        .chain_err(|| "error listing devices")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_data;
    use crate::test_helpers;

    #[test]
    fn test_upsert_creates_and_updates() {
        let mut bootstrap = test_helpers::CommonTestBootstrap::new();
        let (conn, log) = (&mut bootstrap.conn, &bootstrap.log);
        let user = test_data::user::insert(log, conn);

        let created = Upserter {
            user_id: user.user_id,
            name:    "phone".to_owned(),
            kind:    None,
            caption: None,
        }
        .run(log, conn)
        .unwrap()
        .device;
        assert_eq!("other", created.kind);
        assert!(created.active);

        let updated = Upserter {
            user_id: user.user_id,
            name:    "phone".to_owned(),
            kind:    Some("mobile".to_owned()),
            caption: Some("My Phone".to_owned()),
        }
        .run(log, conn)
        .unwrap()
        .device;
        assert_eq!(created.id, updated.id);
        assert_eq!("mobile", updated.kind);
        assert_eq!(Some("My Phone".to_owned()), updated.caption);
    }

    #[test]
    fn test_upsert_rejects_bad_kind() {
        let mut bootstrap = test_helpers::CommonTestBootstrap::new();
        let (conn, log) = (&mut bootstrap.conn, &bootstrap.log);
        let user = test_data::user::insert(log, conn);

        let result = Upserter {
            user_id: user.user_id,
            name:    "phone".to_owned(),
            kind:    Some("toaster".to_owned()),
            caption: None,
        }
        .run(log, conn);
        assert!(result.is_err());
    }

    #[test]
    fn test_ensure_device_is_idempotent() {
        let mut bootstrap = test_helpers::CommonTestBootstrap::new();
        let (conn, log) = (&mut bootstrap.conn, &bootstrap.log);
        let user = test_data::user::insert(log, conn);

        let first = ensure_device(log, conn, user.user_id, "tablet").unwrap();
        let second = ensure_device(log, conn, user.user_id, "tablet").unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!("other", first.kind);
    }

    #[test]
    fn test_rename_conflict() {
        let mut bootstrap = test_helpers::CommonTestBootstrap::new();
        let (conn, log) = (&mut bootstrap.conn, &bootstrap.log);
        let user = test_data::user::insert(log, conn);

        ensure_device(log, conn, user.user_id, "phone").unwrap();
        ensure_device(log, conn, user.user_id, "laptop").unwrap();

        let result = Renamer {
            user_id:  user.user_id,
            old_name: "phone".to_owned(),
            new_name: "laptop".to_owned(),
        }
        .run(log, conn);
        assert!(result.is_err());
    }

    #[test]
    fn test_rename_to_self_succeeds() {
        let mut bootstrap = test_helpers::CommonTestBootstrap::new();
        let (conn, log) = (&mut bootstrap.conn, &bootstrap.log);
        let user = test_data::user::insert(log, conn);

        ensure_device(log, conn, user.user_id, "phone").unwrap();
        let result = Renamer {
            user_id:  user.user_id,
            old_name: "phone".to_owned(),
            new_name: "phone".to_owned(),
        }
        .run(log, conn);
        assert!(result.is_ok());
    }

    #[test]
    fn test_deactivate_then_rename_to_former_name_succeeds() {
        let mut bootstrap = test_helpers::CommonTestBootstrap::new();
        let (conn, log) = (&mut bootstrap.conn, &bootstrap.log);
        let user = test_data::user::insert(log, conn);

        ensure_device(log, conn, user.user_id, "old-phone").unwrap();
        ensure_device(log, conn, user.user_id, "laptop").unwrap();
        Deactivator {
            user_id: user.user_id,
            name:    "old-phone".to_owned(),
        }
        .run(log, conn)
        .unwrap();

        let result = Renamer {
            user_id:  user.user_id,
            old_name: "laptop".to_owned(),
            new_name: "old-phone".to_owned(),
        }
        .run(log, conn);
        assert!(result.is_ok());
    }
}
