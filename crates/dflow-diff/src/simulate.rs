#![forbid(unsafe_code)]

//! Copy-free simulation of a list diff.
//!
//! [`Simulated`] is a rope of borrowed pieces: runs of the source slice and
//! single elements owned by the diff. Every insertion or removal splits at
//! most one run, so the rope holds O(entries) segments regardless of list
//! length, and zero-length runs are never stored.

use std::fmt;

use dflow_core::error::{ObservableError, Result};

enum Segment<'a, T> {
    Run(&'a [T]),
    One(&'a T),
}

impl<T> Clone for Segment<'_, T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Segment<'_, T> {}

impl<T> Segment<'_, T> {
    fn len(&self) -> usize {
        match self {
            Segment::Run(run) => run.len(),
            Segment::One(_) => 1,
        }
    }
}

/// Read-only view of a list with a diff applied.
pub struct Simulated<'a, T> {
    segments: Vec<Segment<'a, T>>,
    len: usize,
}

impl<'a, T> Simulated<'a, T> {
    pub(crate) fn new(source: &'a [T]) -> Self {
        let segments = if source.is_empty() {
            Vec::new()
        } else {
            vec![Segment::Run(source)]
        };
        Self {
            segments,
            len: source.len(),
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn get(&self, index: usize) -> Option<&'a T> {
        let mut offset = index;
        for segment in &self.segments {
            match *segment {
                Segment::Run(run) if offset < run.len() => return Some(&run[offset]),
                Segment::One(element) if offset == 0 => return Some(element),
                _ => offset -= segment.len(),
            }
        }
        None
    }

    pub fn iter(&self) -> impl Iterator<Item = &'a T> + '_ {
        self.segments.iter().flat_map(|segment| match *segment {
            Segment::Run(run) => SegmentIter::Run(run.iter()),
            Segment::One(element) => SegmentIter::One(Some(element)),
        })
    }

    pub fn to_vec(&self) -> Vec<T>
    where
        T: Clone,
    {
        self.iter().cloned().collect()
    }

    /// Number of rope segments; exposed for tests of the no-growth property.
    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    pub(crate) fn insert(&mut self, index: usize, element: &'a T) -> Result<()> {
        if index > self.len {
            return Err(ObservableError::out_of_bounds(index, self.len));
        }
        let at = self.split_at(index);
        self.segments.insert(at, Segment::One(element));
        self.len += 1;
        Ok(())
    }

    pub(crate) fn remove(&mut self, index: usize) -> Result<()> {
        if index >= self.len {
            return Err(ObservableError::out_of_bounds(index, self.len));
        }
        let at = self.split_at(index);
        match self.segments[at] {
            Segment::One(_) => {
                self.segments.remove(at);
            }
            Segment::Run(run) => {
                if run.len() == 1 {
                    self.segments.remove(at);
                } else {
                    self.segments[at] = Segment::Run(&run[1..]);
                }
            }
        }
        self.len -= 1;
        Ok(())
    }

    /// Ensure a segment boundary at `index` and return the segment index that
    /// starts there (`segments.len()` when `index == len`).
    fn split_at(&mut self, index: usize) -> usize {
        let mut offset = 0;
        for at in 0..self.segments.len() {
            if offset == index {
                return at;
            }
            let seg_len = self.segments[at].len();
            if index < offset + seg_len {
                if let Segment::Run(run) = self.segments[at] {
                    let (head, tail) = run.split_at(index - offset);
                    self.segments[at] = Segment::Run(head);
                    self.segments.insert(at + 1, Segment::Run(tail));
                }
                return at + 1;
            }
            offset += seg_len;
        }
        self.segments.len()
    }
}

impl<T> Clone for Simulated<'_, T> {
    fn clone(&self) -> Self {
        Self {
            segments: self.segments.clone(),
            len: self.len,
        }
    }
}

enum SegmentIter<'a, T> {
    Run(std::slice::Iter<'a, T>),
    One(Option<&'a T>),
}

impl<'a, T> Iterator for SegmentIter<'a, T> {
    type Item = &'a T;

    fn next(&mut self) -> Option<&'a T> {
        match self {
            SegmentIter::Run(iter) => iter.next(),
            SegmentIter::One(element) => element.take(),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Simulated<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

impl<T: PartialEq> PartialEq<[T]> for Simulated<'_, T> {
    fn eq(&self, other: &[T]) -> bool {
        self.len == other.len() && self.iter().zip(other).all(|(a, b)| a == b)
    }
}
