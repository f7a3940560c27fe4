use std::fmt::Debug;
use std::hash::Hash;

/// Direction for a single-step move within a sibling group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Up,
    Down,
}

/// An entity that lives in exactly one sibling group and carries a position in it.
///
/// The group is whatever the parent is: a folder id (or none) for feeds, the
/// unit type for folders, which all share one flat group.
pub trait Sibling {
    type Id: Copy + Eq + Hash + Debug;
    type Group: Copy + Eq + Hash + Debug;

    fn id(&self) -> Self::Id;
    fn group(&self) -> Self::Group;
    fn set_group(&mut self, group: Self::Group);
    fn sibling_index(&self) -> usize;
    fn set_sibling_index(&mut self, index: usize);
}

/// Arena of entities with a dense `0..N` index inside every sibling group.
///
/// Every mutating method reindexes the groups it touched before returning,
/// so callers never observe duplicate or missing indices. Members are kept
/// in insertion order; that order breaks ties when two members of a group
/// report the same index (only possible on input from [`OrderedSet::from_members`]).
#[derive(Debug, Clone)]
pub struct OrderedSet<T: Sibling> {
    members: Vec<T>,
}

impl<T: Sibling> Default for OrderedSet<T> {
    fn default() -> Self {
        Self {
            members: Vec::new(),
        }
    }
}

impl<T: Sibling> OrderedSet<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from members in stored order, normalising every group to dense indices.
    pub fn from_members(members: Vec<T>) -> Self {
        let mut set = Self { members };
        let mut groups: Vec<T::Group> = Vec::new();
        for member in &set.members {
            let group = member.group();
            if !groups.contains(&group) {
                groups.push(group);
            }
        }
        for group in groups {
            set.reindex(group);
        }
        set
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn contains(&self, id: T::Id) -> bool {
        self.position(id).is_some()
    }

    pub fn get(&self, id: T::Id) -> Option<&T> {
        self.members.iter().find(|m| m.id() == id)
    }

    /// Members in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.members.iter()
    }

    pub fn group_len(&self, group: T::Group) -> usize {
        self.members.iter().filter(|m| m.group() == group).count()
    }

    /// Members of `group`, ordered by sibling index.
    pub fn group(&self, group: T::Group) -> Vec<&T> {
        let mut members: Vec<&T> = self.members.iter().filter(|m| m.group() == group).collect();
        members.sort_by_key(|m| m.sibling_index());
        members
    }

    /// Append `member` at the end of its group and return its assigned index.
    pub fn append(&mut self, mut member: T) -> usize {
        let index = self.group_len(member.group());
        member.set_sibling_index(index);
        self.members.push(member);
        index
    }

    /// Remove a member and close the gap it leaves in its group.
    pub fn remove(&mut self, id: T::Id) -> Option<T> {
        let pos = self.position(id)?;
        let removed = self.members.remove(pos);
        self.reindex(removed.group());
        Some(removed)
    }

    /// Move a member to the end of `group`. Both the vacated and the receiving
    /// group are reindexed, even when the member already sits in `group`.
    pub fn move_to_group(&mut self, id: T::Id, group: T::Group) -> bool {
        let Some(pos) = self.position(id) else {
            return false;
        };
        let old_group = self.members[pos].group();
        let end = self
            .members
            .iter()
            .filter(|m| m.group() == group && m.id() != id)
            .count();

        let member = &mut self.members[pos];
        member.set_group(group);
        // Past every current sibling so the reindex below puts it last.
        member.set_sibling_index(usize::MAX);

        self.reindex(old_group);
        self.reindex(group);
        debug_assert_eq!(self.members[pos].sibling_index(), end);
        true
    }

    /// Swap a member with its neighbour in the same group.
    ///
    /// Returns `false` for unknown ids and for moves past either end, which
    /// leave every index untouched.
    pub fn shift(&mut self, id: T::Id, direction: Direction) -> bool {
        let Some(pos) = self.position(id) else {
            return false;
        };
        let group = self.members[pos].group();
        let ordered = self.ordered_positions(group);
        let Some(rank) = ordered.iter().position(|&p| p == pos) else {
            return false;
        };

        let neighbour = match direction {
            Direction::Up if rank > 0 => ordered[rank - 1],
            Direction::Down if rank + 1 < ordered.len() => ordered[rank + 1],
            _ => return false,
        };

        let mine = self.members[pos].sibling_index();
        let theirs = self.members[neighbour].sibling_index();
        self.members[pos].set_sibling_index(theirs);
        self.members[neighbour].set_sibling_index(mine);
        self.reindex(group);
        true
    }

    /// Assign `0..N` to `group`, preserving relative order by current index.
    pub fn reindex(&mut self, group: T::Group) {
        for (index, pos) in self.ordered_positions(group).into_iter().enumerate() {
            self.members[pos].set_sibling_index(index);
        }
    }

    /// True when every group holds exactly the indices `0..N`.
    pub fn is_dense(&self) -> bool {
        let mut groups: Vec<T::Group> = Vec::new();
        for member in &self.members {
            if !groups.contains(&member.group()) {
                groups.push(member.group());
            }
        }
        groups.into_iter().all(|group| {
            let mut indices: Vec<usize> = self
                .members
                .iter()
                .filter(|m| m.group() == group)
                .map(|m| m.sibling_index())
                .collect();
            indices.sort_unstable();
            indices.iter().enumerate().all(|(i, &idx)| i == idx)
        })
    }

    fn position(&self, id: T::Id) -> Option<usize> {
        self.members.iter().position(|m| m.id() == id)
    }

    /// Arena positions of `group` sorted by (index, insertion order).
    fn ordered_positions(&self, group: T::Group) -> Vec<usize> {
        let mut positions: Vec<usize> = self
            .members
            .iter()
            .enumerate()
            .filter(|(_, m)| m.group() == group)
            .map(|(pos, _)| pos)
            .collect();
        // Stable sort keeps insertion order for equal indices
        positions.sort_by_key(|&pos| self.members[pos].sibling_index());
        positions
    }
}
