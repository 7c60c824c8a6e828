//! Named stamp patterns and the per-backend texture cache built from them.
//!
//! Patterns are authored as text rows, top row first, `1` for a live cell.
//! Backends turn each one into a single-channel texture once, at
//! construction, and only ever read it afterwards.

use std::collections::HashMap;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Category {
    StillLifes,
    Oscillators,
    Spaceships,
    Guns,
}

impl Category {
    pub fn label(&self) -> &'static str {
        match self {
            Category::StillLifes => "Still Lifes",
            Category::Oscillators => "Oscillators",
            Category::Spaceships => "Spaceships",
            Category::Guns => "Guns",
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct Prefab {
    pub name: &'static str,
    pub category: Category,
    pub rows: &'static [&'static str],
}

impl Prefab {
    pub fn width(&self) -> u32 {
        self.rows.first().map_or(0, |r| r.len() as u32)
    }

    pub fn height(&self) -> u32 {
        self.rows.len() as u32
    }

    /// Bit at column `x` of row `y`, row 0 being the top of the pattern.
    pub fn is_set(&self, x: u32, y: u32) -> bool {
        self.rows
            .get(y as usize)
            .and_then(|row| row.as_bytes().get(x as usize))
            .is_some_and(|&c| c == b'1')
    }

    /// Number of live cells in the pattern.
    pub fn population(&self) -> usize {
        (0..self.height())
            .flat_map(|y| (0..self.width()).map(move |x| (x, y)))
            .filter(|&(x, y)| self.is_set(x, y))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.width() == 0 || self.height() == 0
    }
}

pub const CATALOG: &[Prefab] = &[
    Prefab {
        name: "Block",
        category: Category::StillLifes,
        rows: &["11", "11"],
    },
    Prefab {
        name: "Beehive",
        category: Category::StillLifes,
        rows: &[".11.", "1..1", ".11."],
    },
    Prefab {
        name: "Loaf",
        category: Category::StillLifes,
        rows: &[".11.", "1..1", ".1.1", "..1."],
    },
    Prefab {
        name: "Boat",
        category: Category::StillLifes,
        rows: &["11.", "1.1", ".1."],
    },
    Prefab {
        name: "Blinker",
        category: Category::Oscillators,
        rows: &["111"],
    },
    Prefab {
        name: "Toad",
        category: Category::Oscillators,
        rows: &[".111", "111."],
    },
    Prefab {
        name: "Beacon",
        category: Category::Oscillators,
        rows: &["11..", "11..", "..11", "..11"],
    },
    Prefab {
        name: "Pulsar",
        category: Category::Oscillators,
        rows: &[
            "..111...111..",
            ".............",
            "1....1.1....1",
            "1....1.1....1",
            "1....1.1....1",
            "..111...111..",
            ".............",
            "..111...111..",
            "1....1.1....1",
            "1....1.1....1",
            "1....1.1....1",
            ".............",
            "..111...111..",
        ],
    },
    Prefab {
        name: "Glider",
        category: Category::Spaceships,
        rows: &[".1.", "..1", "111"],
    },
    Prefab {
        name: "Lightweight Spaceship",
        category: Category::Spaceships,
        rows: &[".1..1", "1....", "1...1", "1111."],
    },
    Prefab {
        name: "Gosper Glider Gun",
        category: Category::Guns,
        rows: &[
            "........................1...........",
            "......................1.1...........",
            "............11......11............11",
            "...........1...1....11............11",
            "11........1.....1...11..............",
            "11........1...1.11....1.1...........",
            "..........1.....1.......1...........",
            "...........1...1....................",
            "............11......................",
        ],
    },
];

/// Single-channel texels for a prefab, 0.0 or 1.0, stored bottom row first
/// so that texel row 0 lines up with grid row 0 (normalized v = 0).
#[derive(Clone, Debug, PartialEq)]
pub struct StampTexture {
    pub width: u32,
    pub height: u32,
    pub texels: Vec<f32>,
}

impl StampTexture {
    pub fn from_prefab(prefab: &Prefab) -> Self {
        let (width, height) = (prefab.width(), prefab.height());
        let texels = (0..height)
            .rev()
            .flat_map(|y| (0..width).map(move |x| (x, y)))
            .map(|(x, y)| if prefab.is_set(x, y) { 1.0 } else { 0.0 })
            .collect();
        Self {
            width,
            height,
            texels,
        }
    }

    /// Nearest-texel lookup for a local coordinate in `[0, 1)²`.
    pub fn sample(&self, u: f32, v: f32) -> f32 {
        if self.width == 0 || self.height == 0 {
            return 0.0;
        }
        let x = ((u * self.width as f32).floor() as i64).clamp(0, self.width as i64 - 1);
        let y = ((v * self.height as f32).floor() as i64).clamp(0, self.height as i64 - 1);
        self.texels[y as usize * self.width as usize + x as usize]
    }
}

/// Immutable name → texture map built once per backend.
pub struct PrefabCache<T> {
    entries: HashMap<&'static str, T>,
    catalog: &'static [Prefab],
}

impl<T> PrefabCache<T> {
    /// Build one entry per pattern. Empty patterns are skipped, so they
    /// can never be stamped.
    pub fn build(catalog: &'static [Prefab], mut make: impl FnMut(&Prefab) -> T) -> Self {
        let entries: HashMap<_, _> = catalog
            .iter()
            .filter(|p| {
                if p.is_empty() {
                    log::warn!("prefab {:?} has no cells; skipped", p.name);
                }
                !p.is_empty()
            })
            .map(|p| (p.name, make(p)))
            .collect();
        log::debug!("prefab cache built with {} patterns", entries.len());
        Self { entries, catalog }
    }

    pub fn get(&self, name: &str) -> Option<&T> {
        self.entries.get(name)
    }

    /// The pattern behind a cached entry.
    pub fn prefab(&self, name: &str) -> Option<&'static Prefab> {
        if !self.entries.contains_key(name) {
            return None;
        }
        self.catalog.iter().find(|p| p.name == name)
    }

    /// Drop every cached texture.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Take the cached entries out, e.g. to destroy GPU textures eagerly.
    pub fn drain(&mut self) -> impl Iterator<Item = T> + '_ {
        self.entries.drain().map(|(_, entry)| entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn find(name: &str) -> &'static Prefab {
        CATALOG.iter().find(|p| p.name == name).unwrap()
    }

    #[test]
    fn catalog_rows_are_rectangular() {
        for prefab in CATALOG {
            let w = prefab.width() as usize;
            assert!(w > 0, "{} is empty", prefab.name);
            for row in prefab.rows {
                assert_eq!(row.len(), w, "ragged row in {}", prefab.name);
                assert!(row.bytes().all(|c| c == b'.' || c == b'1'));
            }
        }
    }

    #[test]
    fn catalog_names_are_unique() {
        let mut names: Vec<_> = CATALOG.iter().map(|p| p.name).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), CATALOG.len());
    }

    #[test]
    fn known_populations() {
        assert_eq!(find("Block").population(), 4);
        assert_eq!(find("Glider").population(), 5);
        assert_eq!(find("Pulsar").population(), 48);
        assert_eq!(find("Gosper Glider Gun").population(), 36);
        assert_eq!(find("Lightweight Spaceship").population(), 9);
    }

    #[test]
    fn stamp_texture_is_stored_bottom_up() {
        let glider = find("Glider");
        let tex = StampTexture::from_prefab(glider);
        assert_eq!((tex.width, tex.height), (3, 3));
        // bottom row of the glider is "111"
        assert_eq!(&tex.texels[0..3], &[1.0, 1.0, 1.0]);
        // top row ".1." is last
        assert_eq!(&tex.texels[6..9], &[0.0, 1.0, 0.0]);
        assert_eq!(tex.sample(0.5, 0.9), 1.0);
        assert_eq!(tex.sample(0.1, 0.9), 0.0);
    }

    #[test]
    fn cache_is_keyed_by_name() {
        let cache = PrefabCache::build(CATALOG, StampTexture::from_prefab);
        assert!(CATALOG.iter().all(|p| cache.get(p.name).is_some()));
        assert!(cache.get("Nope").is_none());
        assert_eq!(cache.get("Block").unwrap().texels, vec![1.0; 4]);
        assert_eq!(cache.prefab("Toad").unwrap().category, Category::Oscillators);
    }

    static WITH_EMPTY: [Prefab; 2] = [
        Prefab {
            name: "Nothing",
            category: Category::StillLifes,
            rows: &[],
        },
        Prefab {
            name: "Dot",
            category: Category::StillLifes,
            rows: &["1"],
        },
    ];

    #[test]
    fn empty_patterns_are_not_cached() {
        let cache = PrefabCache::build(&WITH_EMPTY, StampTexture::from_prefab);
        assert!(cache.get("Nothing").is_none());
        assert!(cache.prefab("Nothing").is_none());
        assert_eq!(cache.prefab("Dot").unwrap().population(), 1);

        let empty = StampTexture::from_prefab(&WITH_EMPTY[0]);
        assert_eq!(empty.sample(0.5, 0.5), 0.0);
    }

    #[test]
    fn drain_empties_the_cache() {
        let mut cache = PrefabCache::build(CATALOG, |p| p.name);
        assert_eq!(cache.drain().count(), CATALOG.len());
        assert!(cache.get("Block").is_none());
    }
}
