use crate::cluster::cluster_api::ClusterError;
use crate::cluster::configuration::{Configuration, MemberSnapshot};
use crate::cluster::member::{Member, MemberId, MemberType};
use crate::cluster::progress::ReplicationProgress;
use crate::storage::{LogStorage, MetaStore};
use chrono::{DateTime, Utc};
use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};

/// The aggregate root for one partition's membership state: the local member,
/// the current configuration, one `ReplicationProgress` per remote member, and
/// the role index used for quorum math and member views.
///
/// Not internally synchronized. All mutation must happen on the partition's
/// sequential execution context (the cluster actor); that is what makes the
/// multi-step `configure()` sequence safe without locking.
pub struct ClusterContext<L: LogStorage, M: MetaStore> {
    logger: slog::Logger,
    local_member: Member,
    configuration: Option<Configuration>,
    progress: HashMap<MemberId, ReplicationProgress>,
    members_by_type: HashMap<MemberType, BTreeSet<MemberId>>,
    commit_index: u64,
    persisted_index: Option<u64>,
    log: L,
    meta: M,
}

impl<L: LogStorage, M: MetaStore> ClusterContext<L, M> {
    /// Builds the context, loading and re-applying any persisted
    /// configuration.
    pub fn new(logger: slog::Logger, local_member_id: MemberId, log: L, meta: M) -> Result<Self, ClusterError> {
        let mut context = ClusterContext {
            logger,
            local_member: Member::new(local_member_id, MemberType::Inactive, DateTime::<Utc>::MIN_UTC),
            configuration: None,
            progress: HashMap::new(),
            members_by_type: HashMap::new(),
            commit_index: 0,
            persisted_index: None,
            log,
            meta,
        };

        if let Some(persisted) = context.meta.load_configuration()? {
            slog::info!(
                context.logger,
                "Loaded persisted configuration at index {}",
                persisted.index()
            );
            context.persisted_index = Some(persisted.index());
            // Only committed configurations are ever persisted, so the
            // commit index is known to cover it.
            context.commit_index = persisted.index();
            context.configure(&persisted)?;
        }

        Ok(context)
    }

    /// Creates the cluster's genesis configuration (all supplied ids ACTIVE,
    /// index 0, term 0) and commits it locally without going through
    /// consensus. Only ever happens once, when no prior configuration exists;
    /// with an existing configuration this just transitions the local member
    /// to match it.
    pub fn bootstrap(&mut self, member_ids: Vec<MemberId>) -> Result<(), ClusterError> {
        if self.configuration.is_none() {
            let now = Utc::now();
            let members = member_ids
                .into_iter()
                .map(|id| MemberSnapshot {
                    id,
                    member_type: MemberType::Active,
                    updated: now,
                })
                .collect();
            let genesis = Configuration::new(0, 0, now, members);
            slog::info!(self.logger, "Bootstrapping cluster: {:?}", genesis);
            self.configure(&genesis)?;
        }

        self.commit()?;

        match &self.configuration {
            Some(configuration) if configuration.member(self.local_member.id()).is_some() => Ok(()),
            _ => Err(ClusterError::NotMember),
        }
    }

    /// Applies a new configuration. Configurations must arrive in strictly
    /// increasing index order; a stale or replayed configuration is ignored.
    ///
    /// A local promotion takes effect immediately. A local demotion (or
    /// removal) is deferred until `commit()`: the node keeps operating under
    /// its current type so that, for example, a leader removing itself from
    /// the voter set can still participate in committing that very removal.
    pub fn configure(&mut self, configuration: &Configuration) -> Result<(), ClusterError> {
        if let Some(current) = &self.configuration {
            if configuration.index() <= current.index() {
                slog::debug!(
                    self.logger,
                    "Ignoring stale configuration at index {} (current index {})",
                    configuration.index(),
                    current.index()
                );
                return Ok(());
            }
        }

        let mut local_present = false;
        for snapshot in configuration.members() {
            if &snapshot.id == self.local_member.id() {
                local_present = true;
                if snapshot.member_type > self.local_member.member_type() {
                    slog::info!(
                        self.logger,
                        "Promoting local member {:?} -> {:?}",
                        self.local_member.member_type(),
                        snapshot.member_type
                    );
                    self.local_member.update(snapshot.member_type, snapshot.updated);
                }
            } else {
                self.apply_remote_member(snapshot);
            }
        }

        // Members dropped from the configuration are removed from the cluster
        // context entirely, releasing their log readers.
        let removed: Vec<MemberId> = self
            .progress
            .keys()
            .filter(|id| configuration.member(id).is_none())
            .cloned()
            .collect();
        for id in removed {
            if let Some(progress) = self.progress.remove(&id) {
                self.bucket_remove(progress.member_type(), &id);
                slog::info!(self.logger, "Member {:?} removed from the cluster", id);
            }
        }

        if !local_present {
            slog::info!(
                self.logger,
                "Local member is absent from configuration at index {}; stepping down once it commits",
                configuration.index()
            );
        }

        self.configuration = Some(configuration.clone());

        // Persist only once the hosting log index is known committed. An
        // uncommitted configuration could still be overwritten by a
        // higher-term leader.
        if configuration.index() <= self.commit_index {
            self.persist_current_configuration()?;
        }

        Ok(())
    }

    fn apply_remote_member(&mut self, snapshot: &MemberSnapshot) {
        if !self.progress.contains_key(&snapshot.id) {
            slog::info!(
                self.logger,
                "Tracking new member {:?} as {:?}",
                snapshot.id,
                snapshot.member_type
            );
            let progress = ReplicationProgress::new(snapshot.id.clone(), snapshot.member_type, &self.log);
            self.progress.insert(snapshot.id.clone(), progress);
            self.bucket_insert(snapshot.member_type, snapshot.id.clone());
            return;
        }

        let old_type = match self.progress.get_mut(&snapshot.id) {
            Some(progress) if progress.member_type() != snapshot.member_type => {
                let old_type = progress.member_type();
                progress.update_member_type(snapshot.member_type);
                // A type change invalidates reader visibility and in-flight
                // counters.
                progress.reset_state(&self.log);
                old_type
            }
            _ => return,
        };

        self.bucket_remove(old_type, &snapshot.id);
        self.bucket_insert(snapshot.member_type, snapshot.id.clone());
        slog::info!(
            self.logger,
            "Member {:?} changed type {:?} -> {:?}",
            snapshot.id,
            old_type,
            snapshot.member_type
        );
    }

    /// Finalizes the current configuration once the commit index has reached
    /// its hosting log entry: applies the local member type it implies
    /// (covering the deferred-demotion case) and persists it if the
    /// previously persisted one is older. A no-op while the hosting entry
    /// remains uncommitted, no matter how many earlier entries commit.
    pub fn commit(&mut self) -> Result<(), ClusterError> {
        let configuration = match &self.configuration {
            Some(c) => c.clone(),
            None => return Ok(()),
        };

        // An uncommitted configuration could still be truncated away by a
        // higher-term leader; it must neither demote the local member nor
        // reach durable storage yet.
        if configuration.index() > self.commit_index {
            slog::debug!(
                self.logger,
                "Configuration at index {} is beyond commit index {}; not finalizing yet",
                configuration.index(),
                self.commit_index
            );
            return Ok(());
        }

        match configuration.member(self.local_member.id()) {
            Some(snapshot) => {
                if snapshot.member_type != self.local_member.member_type() {
                    slog::info!(
                        self.logger,
                        "Transitioning local member {:?} -> {:?} for committed configuration at index {}",
                        self.local_member.member_type(),
                        snapshot.member_type,
                        configuration.index()
                    );
                }
                self.local_member.update(snapshot.member_type, snapshot.updated);
            }
            None => {
                slog::info!(
                    self.logger,
                    "Local member is no longer in the committed configuration at index {}; stepping down",
                    configuration.index()
                );
                self.local_member.update(MemberType::Inactive, configuration.timestamp());
            }
        }

        self.persist_current_configuration()
    }

    /// Reloads the configuration from durable storage and re-applies it.
    /// Used on restart/recovery.
    pub fn reset(&mut self) -> Result<(), ClusterError> {
        if let Some(persisted) = self.meta.load_configuration()? {
            slog::info!(
                self.logger,
                "Reapplying persisted configuration at index {}",
                persisted.index()
            );
            self.configuration = None;
            self.persisted_index = Some(persisted.index());
            self.update_commit_index(persisted.index());
            self.configure(&persisted)?;
        }
        Ok(())
    }

    fn persist_current_configuration(&mut self) -> Result<(), ClusterError> {
        let configuration = match &self.configuration {
            Some(c) => c.clone(),
            None => return Ok(()),
        };

        let already_persisted = self.persisted_index.map_or(false, |p| p >= configuration.index());
        if !already_persisted {
            self.meta.store_configuration(&configuration)?;
            self.persisted_index = Some(configuration.index());
            slog::info!(
                self.logger,
                "Persisted configuration at index {}",
                configuration.index()
            );
        }

        Ok(())
    }

    /// Ratchets the node's commit index forward. A lower value is a no-op.
    pub fn update_commit_index(&mut self, commit_index: u64) {
        if commit_index > self.commit_index {
            self.commit_index = commit_index;
        }
    }

    pub fn commit_index(&self) -> u64 {
        self.commit_index
    }

    /// Minimum number of ACTIVE members (local included, via the "+1") whose
    /// agreement commits an entry.
    pub fn quorum(&self) -> usize {
        let remote_active = self
            .members_by_type
            .get(&MemberType::Active)
            .map_or(0, |ids| ids.len());
        (remote_active + 1) / 2 + 1
    }

    pub fn local_member(&self) -> &Member {
        &self.local_member
    }

    pub fn local_member_mut(&mut self) -> &mut Member {
        &mut self.local_member
    }

    pub fn current_configuration(&self) -> Option<&Configuration> {
        self.configuration.as_ref()
    }

    pub fn progress(&self, member_id: &MemberId) -> Option<&ReplicationProgress> {
        self.progress.get(member_id)
    }

    pub fn progress_mut(&mut self, member_id: &MemberId) -> Option<&mut ReplicationProgress> {
        self.progress.get_mut(member_id)
    }

    /// Remote member ids currently holding `member_type`, in id order.
    pub fn member_ids_with_type(&self, member_type: MemberType) -> Vec<MemberId> {
        self.members_by_type
            .get(&member_type)
            .map(|ids| ids.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Progress of all remote ACTIVE members, sorted by the caller-supplied
    /// comparator. Consumed by election/replication collaborators.
    pub fn active_member_states<F>(&self, mut compare: F) -> Vec<&ReplicationProgress>
    where
        F: FnMut(&ReplicationProgress, &ReplicationProgress) -> Ordering,
    {
        let ids = self.member_ids_with_type(MemberType::Active);
        let mut states: Vec<&ReplicationProgress> = ids.iter().filter_map(|id| self.progress.get(id)).collect();
        states.sort_by(|a, b| compare(a, b));
        states
    }

    /// Releases every member's log reader. Pending reconfigure machinery is
    /// owned by the cluster actor and cancelled there.
    pub fn close(mut self) {
        slog::info!(self.logger, "Closing cluster context");
        self.progress.clear();
    }

    fn bucket_insert(&mut self, member_type: MemberType, member_id: MemberId) {
        self.members_by_type.entry(member_type).or_default().insert(member_id);
    }

    fn bucket_remove(&mut self, member_type: MemberType, member_id: &MemberId) {
        if let Some(bucket) = self.members_by_type.get_mut(&member_type) {
            bucket.remove(member_id);
        }
    }
}
