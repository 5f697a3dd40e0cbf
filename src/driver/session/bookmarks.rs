// Copyright Rouven Bauer
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//    https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::collections::HashSet;
use std::ops::{Add, AddAssign, Sub, SubAssign};
use std::sync::Arc;

/// Container for bookmarks: opaque tokens the server hands out after a
/// successful transaction, which clients can present to read their own
/// writes across sessions (causal chaining).
///
/// For easier joining and manipulating of multiple causal chains, bookmarks
/// implement [`Add`] and [`Sub`] on both owned (`Bookmarks`) and borrowed
/// (`&Bookmarks`) values.
///
/// # Example
/// ```
/// use std::collections::HashSet;
///
/// use bolt_transport::bookmarks::Bookmarks;
///
/// fn create_bookmarks<const N: usize>(raw: [&str; N]) -> Bookmarks {
///     Bookmarks::from_raw(raw.into_iter().map(String::from))
/// }
///
/// fn assert_bookmarks<const N: usize>(bookmarks: &Bookmarks, raw: [&str; N]) {
///     assert_eq!(bookmarks.raw().collect::<HashSet<_>>(), HashSet::from(raw));
/// }
///
/// let bm1 = create_bookmarks(["a", "b"]);
/// let mut bm2 = create_bookmarks(["b", "c"]);
///
/// assert_bookmarks(&(bm1 + &bm2), ["a", "b", "c"]);
///
/// bm2 -= create_bookmarks(["a", "c"]);
/// assert_bookmarks(&bm2, ["b"]);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Bookmarks {
    bookmarks: HashSet<Arc<String>>,
}

impl Bookmarks {
    /// Creates a new [`Bookmarks`] instance from the given raw bookmarks.
    ///
    /// This method is mainly intended for testing and deserialization.
    pub fn from_raw(raw: impl IntoIterator<Item = String>) -> Self {
        Bookmarks {
            bookmarks: raw.into_iter().map(Arc::new).collect(),
        }
    }

    /// Return the count of contained bookmarks.
    pub fn len(&self) -> usize {
        self.bookmarks.len()
    }

    /// Returns `true` if this [`Bookmarks`] contains no bookmarks.
    pub fn is_empty(&self) -> bool {
        self.bookmarks.is_empty()
    }

    /// Turn these [`Bookmarks`] into an iterator over the raw contained
    /// bookmarks.
    ///
    /// This method is mainly intended for testing and serialization.
    pub fn into_raw(self) -> impl Iterator<Item = String> {
        self.bookmarks
            .into_iter()
            .map(|bookmark| Arc::try_unwrap(bookmark).unwrap_or_else(|shared| (*shared).clone()))
    }

    /// Return an iterator over the raw contained bookmarks.
    pub fn raw(&self) -> impl ExactSizeIterator<Item = &str> {
        self.bookmarks.iter().map(|bookmark| bookmark.as_str())
    }

    fn absorb(&mut self, other: impl IntoIterator<Item = Arc<String>>) {
        self.bookmarks.extend(other);
    }

    fn expel(&mut self, other: &Bookmarks) {
        self.bookmarks
            .retain(|bookmark| !other.bookmarks.contains(bookmark));
    }

    fn shared(&self) -> impl Iterator<Item = Arc<String>> + '_ {
        self.bookmarks.iter().map(Arc::clone)
    }
}

impl Add for Bookmarks {
    type Output = Bookmarks;

    fn add(mut self, rhs: Self) -> Self::Output {
        self.absorb(rhs.bookmarks);
        self
    }
}

impl Add<&Bookmarks> for Bookmarks {
    type Output = Bookmarks;

    fn add(mut self, rhs: &Bookmarks) -> Self::Output {
        self.absorb(rhs.shared());
        self
    }
}

impl Add for &Bookmarks {
    type Output = Bookmarks;

    fn add(self, rhs: Self) -> Self::Output {
        let mut sum = self.clone();
        sum.absorb(rhs.shared());
        sum
    }
}

impl AddAssign for Bookmarks {
    fn add_assign(&mut self, rhs: Self) {
        self.absorb(rhs.bookmarks);
    }
}

impl AddAssign<&Bookmarks> for Bookmarks {
    fn add_assign(&mut self, rhs: &Bookmarks) {
        self.absorb(rhs.shared());
    }
}

impl Sub for Bookmarks {
    type Output = Bookmarks;

    fn sub(mut self, rhs: Self) -> Self::Output {
        self.expel(&rhs);
        self
    }
}

impl Sub<&Bookmarks> for Bookmarks {
    type Output = Bookmarks;

    fn sub(mut self, rhs: &Bookmarks) -> Self::Output {
        self.expel(rhs);
        self
    }
}

impl Sub for &Bookmarks {
    type Output = Bookmarks;

    fn sub(self, rhs: Self) -> Self::Output {
        let mut difference = self.clone();
        difference.expel(rhs);
        difference
    }
}

impl SubAssign for Bookmarks {
    fn sub_assign(&mut self, rhs: Self) {
        self.expel(&rhs);
    }
}

impl SubAssign<&Bookmarks> for Bookmarks {
    fn sub_assign(&mut self, rhs: &Bookmarks) {
        self.expel(rhs);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bookmarks<const N: usize>(raw: [&str; N]) -> Bookmarks {
        Bookmarks::from_raw(raw.into_iter().map(String::from))
    }

    #[test]
    fn bookmarks_are_a_set() {
        assert_eq!(bookmarks(["a", "a", "b"]).len(), 2);
    }

    #[test]
    fn add_unions() {
        assert_eq!(
            bookmarks(["a", "b"]) + bookmarks(["b", "c"]),
            bookmarks(["a", "b", "c"])
        );
        assert_eq!(
            &bookmarks(["a"]) + &bookmarks(["b"]),
            bookmarks(["a", "b"])
        );
    }

    #[test]
    fn sub_removes() {
        assert_eq!(
            bookmarks(["a", "b", "c"]) - bookmarks(["b", "x"]),
            bookmarks(["a", "c"])
        );
    }
}
