//! Capacity-bounded track queue
//!
//! Positions exposed to callers are 1-based.

use crate::error::{Error, Result};
use crate::track::Track;
use rand::seq::SliceRandom;
use rand::Rng;
use std::collections::VecDeque;
use uuid::Uuid;

#[derive(Debug)]
pub struct TrackQueue {
    items: VecDeque<Track>,
    capacity: usize,
    /// Slots held for tracks temporarily outside the queue
    reserved: usize,
}

impl TrackQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            items: VecDeque::new(),
            capacity: capacity.max(1),
            reserved: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn remaining(&self) -> usize {
        self.capacity
            .saturating_sub(self.items.len() + self.reserved)
    }

    /// Hold one slot so a track taken out of the queue can come back
    pub(crate) fn reserve_slot(&mut self) {
        if self.items.len() + self.reserved < self.capacity {
            self.reserved += 1;
        }
    }

    pub(crate) fn release_slot(&mut self) {
        self.reserved = self.reserved.saturating_sub(1);
    }

    pub fn iter(&self) -> impl Iterator<Item = &Track> {
        self.items.iter()
    }

    pub fn front(&self) -> Option<&Track> {
        self.items.front()
    }

    /// Up to `n` tracks from the head, cloned
    pub fn upcoming(&self, n: usize) -> Vec<Track> {
        self.items.iter().take(n).cloned().collect()
    }

    /// Append as many tracks as fit, in order
    ///
    /// Fails with `QueueFull` only when nothing could be added. Returns
    /// the tracks that did not fit.
    pub fn extend(&mut self, tracks: Vec<Track>) -> Result<Vec<Track>> {
        if tracks.is_empty() {
            return Ok(Vec::new());
        }
        let room = self.remaining();
        if room == 0 {
            return Err(Error::QueueFull(self.capacity));
        }
        let mut tracks = tracks;
        let overflow = if tracks.len() > room {
            tracks.split_off(room)
        } else {
            Vec::new()
        };
        self.items.extend(tracks);
        Ok(overflow)
    }

    pub fn pop_front(&mut self) -> Option<Track> {
        self.items.pop_front()
    }

    /// Put a track back at the head
    ///
    /// Used when a selected track could not be started; never exceeds
    /// capacity because the track was taken from this queue.
    pub fn push_front(&mut self, track: Track) {
        self.items.push_front(track);
        self.items.truncate(self.capacity);
    }

    /// Remove the track at a uniformly random index
    pub fn take_random<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Option<Track> {
        if self.items.is_empty() {
            return None;
        }
        let index = rng.gen_range(0..self.items.len());
        self.items.remove(index)
    }

    /// Finish `finished` in `Queue` loop mode: it moves to the tail and the
    /// head plays next. With an empty queue the finished track plays again.
    pub fn rotate(&mut self, finished: Track) -> Track {
        match self.items.pop_front() {
            Some(next) => {
                self.items.push_back(finished);
                next
            }
            None => finished,
        }
    }

    /// Finish `finished` in `Random` loop mode: it joins the queue and a
    /// uniformly random member of the result is removed to play next.
    pub fn rotate_random<R: Rng + ?Sized>(&mut self, finished: Track, rng: &mut R) -> Track {
        let index = rng.gen_range(0..=self.items.len());
        if index == self.items.len() {
            return finished;
        }
        match self.items.remove(index) {
            Some(next) => {
                self.items.push_back(finished);
                next
            }
            None => finished,
        }
    }

    /// Remove the track at a 1-based position
    pub fn remove(&mut self, position: usize) -> Result<Track> {
        if position == 0 || position > self.items.len() {
            return Err(Error::InvalidPosition(position));
        }
        self.items
            .remove(position - 1)
            .ok_or(Error::InvalidPosition(position))
    }

    pub fn remove_entry(&mut self, entry_id: Uuid) -> Option<Track> {
        let index = self.items.iter().position(|t| t.entry_id == entry_id)?;
        self.items.remove(index)
    }

    /// Drop the tracks ahead of a 1-based position so it becomes the head
    ///
    /// With `keep_rotation` the skipped tracks move to the tail instead.
    pub fn skip_to(&mut self, position: usize, keep_rotation: bool) -> Result<Vec<Track>> {
        if position == 0 || position > self.items.len() {
            return Err(Error::InvalidPosition(position));
        }
        let skipped: Vec<Track> = self.items.drain(..position - 1).collect();
        if keep_rotation {
            self.items.extend(skipped);
            Ok(Vec::new())
        } else {
            Ok(skipped)
        }
    }

    pub fn shuffle<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        self.items.make_contiguous().shuffle(rng);
    }

    pub fn clear(&mut self) -> Vec<Track> {
        self.items.drain(..).collect()
    }

    pub fn ids(&self) -> Vec<String> {
        self.items.iter().map(|t| t.id().to_string()).collect()
    }
}
