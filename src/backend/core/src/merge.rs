//! Set algebra over ascending sequences.
//!
//! Every replicated container in this crate keeps its value as a sorted,
//! duplicate-free `Vec`. Combining two such sequences is a single linear pass
//! that advances through both inputs at once; what survives is chosen by a
//! [`MergeFlags`] triple:
//!
//! | flags | operation |
//! |---|---|
//! | left, right, both | [`union`] |
//! | left, right | [`symmetric_difference`] |
//! | both | [`intersection`] |
//! | left | [`difference`] |
//!
//! The inputs must already be strictly ascending under the supplied order.
//! That precondition is checked up front and a violation comes back as
//! [`ErrorCode::OrderingViolation`](crate::error::ErrorCode::OrderingViolation)
//! instead of a silently wrong merge.

use std::cmp::Ordering;

use crate::error::{Result, SyncError};

/// A total order over `T`, passed to containers at construction.
pub type Comparator<T> = fn(&T, &T) -> Ordering;

/// Which elements survive a merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MergeFlags {
    /// Keep elements present only in the left sequence
    pub left_only: bool,
    /// Keep elements present only in the right sequence
    pub right_only: bool,
    /// Keep one copy of elements present in both
    pub both: bool,
}

impl MergeFlags {
    pub const UNION: Self = Self::new(true, true, true);
    pub const SYMMETRIC_DIFFERENCE: Self = Self::new(true, true, false);
    pub const INTERSECTION: Self = Self::new(false, false, true);
    pub const DIFFERENCE: Self = Self::new(true, false, false);

    pub const fn new(left_only: bool, right_only: bool, both: bool) -> Self {
        Self {
            left_only,
            right_only,
            both,
        }
    }
}

/// Merge two strictly ascending sequences under `cmp`.
pub fn merge_by<T, F>(a: &[T], b: &[T], flags: MergeFlags, cmp: F) -> Result<Vec<T>>
where
    T: Clone,
    F: Fn(&T, &T) -> Ordering,
{
    check_ascending(a, &cmp, "merge")?;
    check_ascending(b, &cmp, "merge")?;

    // Nothing can be "in both" when one side is empty.
    if a.is_empty() {
        return Ok(if flags.right_only { b.to_vec() } else { Vec::new() });
    }
    if b.is_empty() {
        return Ok(if flags.left_only { a.to_vec() } else { Vec::new() });
    }

    let mut out = Vec::with_capacity(a.len() + b.len());
    let (mut x, mut y) = (0, 0);

    while x < a.len() && y < b.len() {
        match cmp(&a[x], &b[y]) {
            Ordering::Less => {
                if flags.left_only {
                    out.push(a[x].clone());
                }
                x += 1;
            }
            Ordering::Greater => {
                if flags.right_only {
                    out.push(b[y].clone());
                }
                y += 1;
            }
            Ordering::Equal => {
                if flags.both {
                    out.push(a[x].clone());
                }
                x += 1;
                y += 1;
            }
        }
    }

    if x < a.len() {
        if flags.left_only {
            out.extend_from_slice(&a[x..]);
        }
    } else if y < b.len() && flags.right_only {
        out.extend_from_slice(&b[y..]);
    }

    Ok(out)
}

/// Merge two strictly ascending sequences under their natural order.
pub fn merge<T: Ord + Clone>(a: &[T], b: &[T], flags: MergeFlags) -> Result<Vec<T>> {
    merge_by(a, b, flags, T::cmp)
}

pub fn union_by<T: Clone>(a: &[T], b: &[T], cmp: Comparator<T>) -> Result<Vec<T>> {
    merge_by(a, b, MergeFlags::UNION, cmp)
}

pub fn symmetric_difference_by<T: Clone>(a: &[T], b: &[T], cmp: Comparator<T>) -> Result<Vec<T>> {
    merge_by(a, b, MergeFlags::SYMMETRIC_DIFFERENCE, cmp)
}

pub fn intersection_by<T: Clone>(a: &[T], b: &[T], cmp: Comparator<T>) -> Result<Vec<T>> {
    merge_by(a, b, MergeFlags::INTERSECTION, cmp)
}

/// Elements of `a` that are not in `b`.
pub fn difference_by<T: Clone>(a: &[T], b: &[T], cmp: Comparator<T>) -> Result<Vec<T>> {
    merge_by(a, b, MergeFlags::DIFFERENCE, cmp)
}

pub fn union<T: Ord + Clone>(a: &[T], b: &[T]) -> Result<Vec<T>> {
    merge(a, b, MergeFlags::UNION)
}

pub fn symmetric_difference<T: Ord + Clone>(a: &[T], b: &[T]) -> Result<Vec<T>> {
    merge(a, b, MergeFlags::SYMMETRIC_DIFFERENCE)
}

pub fn intersection<T: Ord + Clone>(a: &[T], b: &[T]) -> Result<Vec<T>> {
    merge(a, b, MergeFlags::INTERSECTION)
}

/// Elements of `a` that are not in `b`.
pub fn difference<T: Ord + Clone>(a: &[T], b: &[T]) -> Result<Vec<T>> {
    merge(a, b, MergeFlags::DIFFERENCE)
}

/// Collapse runs of equal neighbours in a non-decreasing sequence.
///
/// An empty input is a caller bug and is reported as
/// [`ErrorCode::EmptyInput`](crate::error::ErrorCode::EmptyInput).
pub fn remove_adjacent_duplicates_by<T, F>(a: &[T], cmp: F) -> Result<Vec<T>>
where
    T: Clone,
    F: Fn(&T, &T) -> Ordering,
{
    let (first, rest) = a
        .split_first()
        .ok_or_else(|| SyncError::empty_input("remove_adjacent_duplicates"))?;

    let mut out = Vec::with_capacity(a.len());
    out.push(first.clone());
    let mut prev = first;

    for (offset, item) in rest.iter().enumerate() {
        match cmp(prev, item) {
            Ordering::Less => {
                out.push(item.clone());
                prev = item;
            }
            Ordering::Equal => {}
            Ordering::Greater => {
                return Err(SyncError::ordering_violation(
                    "remove_adjacent_duplicates",
                    offset + 1,
                ))
            }
        }
    }

    Ok(out)
}

pub fn remove_adjacent_duplicates<T: Ord + Clone>(a: &[T]) -> Result<Vec<T>> {
    remove_adjacent_duplicates_by(a, T::cmp)
}

/// Sort and deduplicate arbitrary input into the form the merge functions accept.
///
/// Used on values arriving from peers, which are never trusted to be ordered.
pub fn normalize_by<T: Clone>(mut values: Vec<T>, cmp: Comparator<T>) -> Vec<T> {
    if values.len() < 2 {
        return values;
    }
    values.sort_by(cmp);
    values.dedup_by(|a, b| cmp(a, b) == Ordering::Equal);
    values
}

/// Returns `true` if `a` is strictly ascending under `cmp`.
pub fn is_strictly_ascending<T, F>(a: &[T], cmp: F) -> bool
where
    F: Fn(&T, &T) -> Ordering,
{
    a.windows(2).all(|w| cmp(&w[0], &w[1]) == Ordering::Less)
}

fn check_ascending<T, F>(a: &[T], cmp: &F, operation: &'static str) -> Result<()>
where
    F: Fn(&T, &T) -> Ordering,
{
    match a
        .windows(2)
        .position(|w| cmp(&w[0], &w[1]) != Ordering::Less)
    {
        Some(i) => Err(SyncError::ordering_violation(operation, i + 1)),
        None => Ok(()),
    }
}
