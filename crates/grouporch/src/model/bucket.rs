//! Group kinds, bucket treatments, and bucket lists.

use grouporch_types::{GroupId, MacAddress, PortNumber, VlanId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Kind of a group, which is also the kind of each of its buckets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum GroupType {
    /// Every bucket is executed (multicast/broadcast).
    All,
    /// One bucket is selected per flow (ECMP/WCMP).
    Select,
    /// Exactly one bucket; used to share a next hop.
    Indirect,
    /// First live bucket is executed (fast failover).
    Failover,
}

impl fmt::Display for GroupType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            GroupType::All => "ALL",
            GroupType::Select => "SELECT",
            GroupType::Indirect => "INDIRECT",
            GroupType::Failover => "FAILOVER",
        };
        f.write_str(s)
    }
}

/// One forwarding action inside a bucket treatment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Instruction {
    Output(PortNumber),
    SetEthSrc(MacAddress),
    SetEthDst(MacAddress),
    PushVlan,
    SetVlanId(VlanId),
    PopVlan,
    PushMpls,
    SetMplsLabel(u32),
    PopMpls,
    SetQueue(u32),
    /// Chain to another group.
    Group(GroupId),
}

/// Ordered action set applied by a bucket.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Treatment {
    instructions: Vec<Instruction>,
}

impl Treatment {
    pub fn builder() -> TreatmentBuilder {
        TreatmentBuilder::default()
    }

    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    /// Ports this treatment sends packets out of.
    pub fn outputs(&self) -> impl Iterator<Item = PortNumber> + '_ {
        self.instructions.iter().filter_map(|i| match i {
            Instruction::Output(port) => Some(*port),
            _ => None,
        })
    }

    /// Groups this treatment chains to.
    pub fn chained_groups(&self) -> impl Iterator<Item = GroupId> + '_ {
        self.instructions.iter().filter_map(|i| match i {
            Instruction::Group(id) => Some(*id),
            _ => None,
        })
    }
}

/// Builder for [`Treatment`].
#[derive(Debug, Default)]
pub struct TreatmentBuilder {
    instructions: Vec<Instruction>,
}

impl TreatmentBuilder {
    pub fn output(mut self, port: PortNumber) -> Self {
        self.instructions.push(Instruction::Output(port));
        self
    }

    pub fn set_eth_src(mut self, mac: MacAddress) -> Self {
        self.instructions.push(Instruction::SetEthSrc(mac));
        self
    }

    pub fn set_eth_dst(mut self, mac: MacAddress) -> Self {
        self.instructions.push(Instruction::SetEthDst(mac));
        self
    }

    pub fn push_vlan(mut self) -> Self {
        self.instructions.push(Instruction::PushVlan);
        self
    }

    pub fn set_vlan_id(mut self, vlan: VlanId) -> Self {
        self.instructions.push(Instruction::SetVlanId(vlan));
        self
    }

    pub fn pop_vlan(mut self) -> Self {
        self.instructions.push(Instruction::PopVlan);
        self
    }

    pub fn push_mpls(mut self) -> Self {
        self.instructions.push(Instruction::PushMpls);
        self
    }

    pub fn set_mpls_label(mut self, label: u32) -> Self {
        self.instructions.push(Instruction::SetMplsLabel(label));
        self
    }

    pub fn pop_mpls(mut self) -> Self {
        self.instructions.push(Instruction::PopMpls);
        self
    }

    pub fn set_queue(mut self, queue: u32) -> Self {
        self.instructions.push(Instruction::SetQueue(queue));
        self
    }

    pub fn group(mut self, id: GroupId) -> Self {
        self.instructions.push(Instruction::Group(id));
        self
    }

    pub fn build(self) -> Treatment {
        Treatment {
            instructions: self.instructions,
        }
    }
}

/// One member of a group: a treatment plus kind-specific parameters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GroupBucket {
    kind: GroupType,
    treatment: Treatment,
    weight: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    watch_port: Option<PortNumber>,
    #[serde(skip_serializing_if = "Option::is_none")]
    watch_group: Option<GroupId>,
}

impl GroupBucket {
    fn new(kind: GroupType, treatment: Treatment) -> Self {
        Self {
            kind,
            treatment,
            weight: 1,
            watch_port: None,
            watch_group: None,
        }
    }

    pub fn select(treatment: Treatment) -> Self {
        Self::new(GroupType::Select, treatment)
    }

    pub fn weighted_select(treatment: Treatment, weight: u16) -> Self {
        Self {
            weight,
            ..Self::new(GroupType::Select, treatment)
        }
    }

    pub fn all(treatment: Treatment) -> Self {
        Self::new(GroupType::All, treatment)
    }

    pub fn indirect(treatment: Treatment) -> Self {
        Self::new(GroupType::Indirect, treatment)
    }

    pub fn failover(
        treatment: Treatment,
        watch_port: Option<PortNumber>,
        watch_group: Option<GroupId>,
    ) -> Self {
        Self {
            watch_port,
            watch_group,
            ..Self::new(GroupType::Failover, treatment)
        }
    }

    pub fn kind(&self) -> GroupType {
        self.kind
    }

    pub fn treatment(&self) -> &Treatment {
        &self.treatment
    }

    pub fn weight(&self) -> u16 {
        self.weight
    }

    pub fn watch_port(&self) -> Option<PortNumber> {
        self.watch_port
    }

    pub fn watch_group(&self) -> Option<GroupId> {
        self.watch_group
    }

    /// Same bucket as far as add/remove requests are concerned.
    ///
    /// The weight is a parameter of the bucket, not part of its identity, so
    /// adding a bucket that differs only in weight replaces the old one.
    pub fn same_identity(&self, other: &GroupBucket) -> bool {
        self.kind == other.kind
            && self.treatment == other.treatment
            && self.watch_port == other.watch_port
            && self.watch_group == other.watch_group
    }
}

/// Ordered list of buckets.
///
/// Order is kept as the application supplied it, but two lists are equal
/// when they hold the same buckets the same number of times.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GroupBuckets(Vec<GroupBucket>);

impl GroupBuckets {
    pub fn new(buckets: Vec<GroupBucket>) -> Self {
        GroupBuckets(buckets)
    }

    pub fn empty() -> Self {
        GroupBuckets(Vec::new())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, GroupBucket> {
        self.0.iter()
    }

    pub fn as_slice(&self) -> &[GroupBucket] {
        &self.0
    }

    /// Ordered, element-wise comparison.
    pub fn identical(&self, other: &GroupBuckets) -> bool {
        self.0 == other.0
    }

    /// Merges `added` into this list.
    ///
    /// Buckets matching an added bucket by identity are replaced; the added
    /// buckets are appended. Returns `None` when nothing would change.
    pub fn with_added(&self, added: &GroupBuckets) -> Option<GroupBuckets> {
        let mut changed = false;
        let mut merged = Vec::with_capacity(self.len() + added.len());

        for old in &self.0 {
            match added.iter().find(|new| new.same_identity(old)) {
                Some(new) if new != old => changed = true,
                Some(_) => {}
                None => merged.push(old.clone()),
            }
        }
        if added.iter().any(|new| !self.0.contains(new)) {
            changed = true;
        }
        merged.extend(added.iter().cloned());

        changed.then_some(GroupBuckets(merged))
    }

    /// Drops every bucket matching one of `removed` by identity.
    ///
    /// Returns `None` when no bucket matched.
    pub fn with_removed(&self, removed: &GroupBuckets) -> Option<GroupBuckets> {
        let kept: Vec<GroupBucket> = self
            .0
            .iter()
            .filter(|old| !removed.iter().any(|r| r.same_identity(old)))
            .cloned()
            .collect();

        (kept.len() != self.len()).then_some(GroupBuckets(kept))
    }

    /// Checks that the buckets are well formed for a group of `kind`.
    pub fn validate(&self, kind: GroupType) -> Result<(), String> {
        if let Some(bad) = self.0.iter().find(|b| b.kind != kind) {
            return Err(format!("{} bucket in {} group", bad.kind, kind));
        }
        match kind {
            GroupType::Indirect if self.len() != 1 => Err(format!(
                "INDIRECT group needs exactly one bucket, got {}",
                self.len()
            )),
            GroupType::Select if self.0.iter().any(|b| b.weight == 0) => {
                Err("SELECT bucket with zero weight".to_string())
            }
            GroupType::Failover
                if self
                    .0
                    .iter()
                    .any(|b| b.watch_port.is_none() && b.watch_group.is_none()) =>
            {
                Err("FAILOVER bucket without watch port or watch group".to_string())
            }
            _ => Ok(()),
        }
    }
}

impl PartialEq for GroupBuckets {
    fn eq(&self, other: &Self) -> bool {
        if self.len() != other.len() {
            return false;
        }
        let mut counts: HashMap<&GroupBucket, usize> = HashMap::with_capacity(self.len());
        for bucket in &self.0 {
            *counts.entry(bucket).or_default() += 1;
        }
        for bucket in &other.0 {
            match counts.get_mut(bucket) {
                Some(count) if *count > 0 => *count -= 1,
                _ => return false,
            }
        }
        true
    }
}

impl Eq for GroupBuckets {}

impl From<Vec<GroupBucket>> for GroupBuckets {
    fn from(buckets: Vec<GroupBucket>) -> Self {
        GroupBuckets(buckets)
    }
}

impl<'a> IntoIterator for &'a GroupBuckets {
    type Item = &'a GroupBucket;
    type IntoIter = std::slice::Iter<'a, GroupBucket>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn mpls_bucket(port: u32) -> GroupBucket {
        GroupBucket::select(
            Treatment::builder()
                .output(PortNumber::new(port))
                .set_eth_dst("00:00:00:00:00:02".parse().unwrap())
                .set_eth_src("00:00:00:00:00:01".parse().unwrap())
                .push_mpls()
                .set_mpls_label(106)
                .build(),
        )
    }

    fn buckets(ports: &[u32]) -> GroupBuckets {
        GroupBuckets::new(ports.iter().map(|p| mpls_bucket(*p)).collect())
    }

    #[test]
    fn test_equality_ignores_order() {
        assert_eq!(buckets(&[31, 32, 41]), buckets(&[41, 31, 32]));
        assert!(!buckets(&[31, 32, 41]).identical(&buckets(&[41, 31, 32])));
    }

    #[test]
    fn test_equality_counts_duplicates() {
        assert_ne!(buckets(&[31, 31, 32]), buckets(&[31, 32, 32]));
        assert_ne!(buckets(&[31]), buckets(&[31, 31]));
    }

    #[test]
    fn test_with_added_appends_new_buckets() {
        let merged = buckets(&[31, 32]).with_added(&buckets(&[51, 52])).unwrap();
        assert!(merged.identical(&buckets(&[31, 32, 51, 52])));
    }

    #[test]
    fn test_with_added_noop_when_already_present() {
        assert!(buckets(&[31, 32]).with_added(&buckets(&[32])).is_none());
    }

    #[test]
    fn test_with_added_replaces_reweighted_bucket() {
        let old = buckets(&[31, 32]);
        let heavier = GroupBucket::weighted_select(mpls_bucket(32).treatment().clone(), 5);
        let merged = old.with_added(&GroupBuckets::new(vec![heavier.clone()])).unwrap();

        assert_eq!(merged.len(), 2);
        assert!(merged.iter().any(|b| *b == heavier));
        assert!(!merged.iter().any(|b| *b == mpls_bucket(32)));
    }

    #[test]
    fn test_with_removed() {
        let kept = buckets(&[31, 32, 51, 52]).with_removed(&buckets(&[31, 32])).unwrap();
        assert!(kept.identical(&buckets(&[51, 52])));
        assert!(buckets(&[51]).with_removed(&buckets(&[31])).is_none());
    }

    #[test]
    fn test_validate() {
        assert!(buckets(&[31, 32]).validate(GroupType::Select).is_ok());
        assert!(buckets(&[31]).validate(GroupType::All).is_err());
        assert!(GroupBuckets::empty().validate(GroupType::Select).is_ok());

        let indirect = GroupBuckets::new(vec![
            GroupBucket::indirect(Treatment::builder().output(PortNumber::new(1)).build()),
            GroupBucket::indirect(Treatment::builder().output(PortNumber::new(2)).build()),
        ]);
        assert!(indirect.validate(GroupType::Indirect).is_err());

        let unwatched = GroupBuckets::new(vec![GroupBucket::failover(
            Treatment::builder().output(PortNumber::new(1)).build(),
            None,
            None,
        )]);
        assert!(unwatched.validate(GroupType::Failover).is_err());
    }

    #[test]
    fn test_treatment_outputs() {
        let t = Treatment::builder()
            .output(PortNumber::new(7))
            .group(GroupId::new(3))
            .output(PortNumber::new(8))
            .build();
        assert_eq!(t.outputs().collect::<Vec<_>>(), vec![PortNumber::new(7), PortNumber::new(8)]);
        assert_eq!(t.chained_groups().collect::<Vec<_>>(), vec![GroupId::new(3)]);
    }
}
