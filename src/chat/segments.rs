//! Ordered, growable buffer of bounded-length output segments.
//!
//! Lengths are counted in `char`s. A fragment is never split: when appending
//! it to the last segment would exceed the limit it opens a new segment, even
//! if the fragment alone is longer than the limit.

/// Where [`SegmentBuffer::push_fragment`] put a fragment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    /// Buffer was empty; fragment became segment 0.
    First,
    /// Appended to the last segment.
    Grew,
    /// Would have overflowed; fragment opened a new segment.
    Split,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SegmentBuffer {
    segments: Vec<String>,
    // char count of the last segment
    last_chars: usize,
}

impl SegmentBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_fragment(&mut self, fragment: &str, max_chars: usize) -> Placement {
        let fragment_chars = fragment.chars().count();

        let Some(last) = self.segments.len().checked_sub(1) else {
            self.segments.push(fragment.to_string());
            self.last_chars = fragment_chars;
            return Placement::First;
        };

        if self.last_chars + fragment_chars > max_chars {
            self.segments.push(fragment.to_string());
            self.last_chars = fragment_chars;
            return Placement::Split;
        }

        self.segments[last].push_str(fragment);
        self.last_chars += fragment_chars;
        Placement::Grew
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    #[cfg(test)]
    pub fn get(&self, index: usize) -> Option<&str> {
        self.segments.get(index).map(String::as_str)
    }

    #[cfg(test)]
    pub fn last(&self) -> Option<&str> {
        self.segments.last().map(String::as_str)
    }

    #[cfg(test)]
    pub fn as_slice(&self) -> &[String] {
        &self.segments
    }

    pub fn into_vec(self) -> Vec<String> {
        self.segments
    }
}
