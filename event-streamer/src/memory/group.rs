use std::collections::HashMap;

/// How a group's partitions are spread over its members on rebalance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AssignmentStrategy {
    /// Partition `p` goes to member `p % members`.
    RoundRobin,
    /// Members keep the partitions they already had as far as balance allows.
    #[default]
    Sticky,
}

/// Membership, assignment and partition ownership of one group on one topic.
///
/// Assignment says who *should* read a partition in the current generation;
/// ownership says who currently *does*. A member may only take ownership of a
/// partition assigned to it once the previous owner let go, so no partition
/// is ever read by two members at once.
#[derive(Debug, Default)]
pub(crate) struct Group {
    generation: u64,
    members: Vec<String>,
    assignment: HashMap<String, Vec<i32>>,
    owners: HashMap<i32, String>,
}

impl Group {
    pub(crate) fn generation(&self) -> u64 {
        self.generation
    }

    pub(crate) fn members(&self) -> &[String] {
        &self.members
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub(crate) fn join(&mut self, member_id: &str) {
        if !self.members.iter().any(|m| m == member_id) {
            self.members.push(member_id.to_string());
        }
    }

    pub(crate) fn leave(&mut self, member_id: &str) {
        self.members.retain(|m| m != member_id);
        self.assignment.remove(member_id);
        self.owners.retain(|_, owner| owner != member_id);
    }

    /// Starts a new generation with a fresh assignment of `partitions`.
    pub(crate) fn rebalance(&mut self, partitions: i32, strategy: AssignmentStrategy) {
        self.owners.retain(|partition, _| *partition < partitions);
        self.assignment = assign(strategy, &self.members, partitions, &self.assignment);
        self.generation += 1;
    }

    /// Partitions assigned to `member_id`, or `None` when it is not a member.
    pub(crate) fn assigned(&self, member_id: &str) -> Option<Vec<i32>> {
        if !self.members.iter().any(|m| m == member_id) {
            return None;
        }
        Some(self.assignment.get(member_id).cloned().unwrap_or_default())
    }

    /// Takes ownership of an assigned partition if nobody else holds it.
    pub(crate) fn acquire(&mut self, member_id: &str, partition: i32) -> bool {
        let assigned = self
            .assignment
            .get(member_id)
            .is_some_and(|partitions| partitions.contains(&partition));
        if !assigned {
            return false;
        }
        match self.owners.get(&partition) {
            Some(owner) => owner == member_id,
            None => {
                self.owners.insert(partition, member_id.to_string());
                true
            }
        }
    }

    /// Gives up every owned partition not listed in `keep`. Returns whether
    /// anything was released.
    pub(crate) fn retain_owned(&mut self, member_id: &str, keep: &[i32]) -> bool {
        let before = self.owners.len();
        self.owners
            .retain(|partition, owner| owner != member_id || keep.contains(partition));
        self.owners.len() != before
    }

    pub(crate) fn owns(&self, member_id: &str, partition: i32) -> bool {
        self.owners.get(&partition).is_some_and(|owner| owner == member_id)
    }

    pub(crate) fn owner(&self, partition: i32) -> Option<&str> {
        self.owners.get(&partition).map(String::as_str)
    }
}

fn assign(
    strategy: AssignmentStrategy,
    members: &[String],
    partitions: i32,
    previous: &HashMap<String, Vec<i32>>,
) -> HashMap<String, Vec<i32>> {
    let mut result: HashMap<String, Vec<i32>> =
        members.iter().map(|m| (m.clone(), Vec::new())).collect();
    if members.is_empty() {
        return result;
    }

    match strategy {
        AssignmentStrategy::RoundRobin => {
            for partition in 0..partitions {
                let member = &members[partition as usize % members.len()];
                result.entry(member.clone()).or_default().push(partition);
            }
        }
        AssignmentStrategy::Sticky => {
            let base = partitions as usize / members.len();
            let mut extra_slots = partitions as usize % members.len();

            let mut previous_owner: HashMap<i32, &str> = HashMap::new();
            for (member, owned) in previous {
                for partition in owned {
                    previous_owner.insert(*partition, member.as_str());
                }
            }

            let mut unassigned = Vec::new();
            for partition in 0..partitions {
                let kept = previous_owner
                    .get(&partition)
                    .and_then(|member| result.get_mut(*member))
                    .is_some_and(|held| {
                        if held.len() < base {
                            held.push(partition);
                            true
                        } else if held.len() == base && extra_slots > 0 {
                            held.push(partition);
                            extra_slots -= 1;
                            true
                        } else {
                            false
                        }
                    });
                if !kept {
                    unassigned.push(partition);
                }
            }

            for partition in unassigned {
                let target = members
                    .iter()
                    .min_by_key(|m| result.get(*m).map_or(0, Vec::len))
                    .cloned();
                if let Some(member) = target {
                    result.entry(member).or_default().push(partition);
                }
            }
        }
    }

    for owned in result.values_mut() {
        owned.sort_unstable();
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn members(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    #[test]
    fn round_robin_spreads_partitions() {
        let result = assign(
            AssignmentStrategy::RoundRobin,
            &members(&["a", "b"]),
            5,
            &HashMap::new(),
        );
        assert_eq!(result["a"], vec![0, 2, 4]);
        assert_eq!(result["b"], vec![1, 3]);
    }

    #[test]
    fn sticky_keeps_existing_partitions() {
        let previous: HashMap<String, Vec<i32>> =
            [("a".to_string(), vec![0, 1, 2, 3])].into_iter().collect();
        let result = assign(
            AssignmentStrategy::Sticky,
            &members(&["a", "b"]),
            4,
            &previous,
        );
        assert_eq!(result["a"], vec![0, 1]);
        assert_eq!(result["b"], vec![2, 3]);
    }

    #[test]
    fn sticky_stays_balanced() {
        let previous: HashMap<String, Vec<i32>> = [
            ("a".to_string(), vec![0, 1]),
            ("b".to_string(), vec![2, 3]),
        ]
        .into_iter()
        .collect();
        let result = assign(
            AssignmentStrategy::Sticky,
            &members(&["a", "b", "c"]),
            4,
            &previous,
        );
        let mut sizes: Vec<usize> = result.values().map(Vec::len).collect();
        sizes.sort_unstable();
        assert_eq!(sizes, vec![1, 1, 2]);

        let total: usize = sizes.iter().sum();
        assert_eq!(total, 4);
    }

    #[test]
    fn ownership_requires_release_by_previous_owner() {
        let mut group = Group::default();
        group.join("a");
        group.rebalance(2, AssignmentStrategy::Sticky);
        assert!(group.acquire("a", 0));
        assert!(group.acquire("a", 1));

        group.join("b");
        group.rebalance(2, AssignmentStrategy::Sticky);
        let moved = group.assigned("b").unwrap();
        assert_eq!(moved.len(), 1);

        // still held by "a" until it lets go
        assert!(!group.acquire("b", moved[0]));
        let kept = group.assigned("a").unwrap();
        assert!(group.retain_owned("a", &kept));
        assert!(group.acquire("b", moved[0]));
        assert_eq!(group.owner(moved[0]), Some("b"));
    }

    #[test]
    fn leaving_releases_everything() {
        let mut group = Group::default();
        group.join("a");
        group.rebalance(3, AssignmentStrategy::RoundRobin);
        assert!(group.acquire("a", 2));

        group.leave("a");
        assert!(group.owner(2).is_none());
        assert!(group.assigned("a").is_none());
        assert!(group.is_empty());
    }
}
