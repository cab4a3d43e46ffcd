//! Deterministic whimsical batch names.
//!
//! Each list is shuffled with a seeded PRNG and one entry is taken from each,
//! so the same sequence number always yields the same name while consecutive
//! numbers walk through the shuffled lists without repeating a component
//! until the longest list is exhausted.

use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

const NAME_SEED: u64 = 0xF00D1E5;

const PREFIXES: &[&str] = &[
    "A", "B", "C", "D", "E", "F", "G", "H", "J", "K", "L", "M", "N", "P", "R", "S", "T", "V",
    "W", "Z",
];

const DIGITS: &[&str] = &["0", "1", "2", "3", "4", "5", "6", "7", "8", "9"];

const MATERIALS: &[&str] = &[
    "Basalt",
    "Bronze",
    "Clay",
    "Diamond",
    "Emerald",
    "Granite",
    "Jade",
    "Marble",
    "Obsidian",
    "Quartzite",
    "Serpentine",
    "Cedar",
    "Mahogany",
    "Maple",
    "Oak",
    "Pine",
    "Teak",
    "Holographic",
    "Polyester",
    "Origami",
];

const CREATURES: &[&str] = &[
    "Dracaenae",
    "Gargouille",
    "Gendenwitha",
    "HuayChivo",
    "Kubikajiri",
    "Laestrygonian",
    "Manananggal",
    "Namahage",
    "OrcoMamman",
    "Penanggalan",
    "Qingniao",
    "Shinigami",
    "Soucouyant",
    "Unicorn",
    "Xiangliu",
    "Zombie",
    "Vampire",
    "Werewolf",
    "Cthulu",
    "Yeti",
];

const LINKERS: &[&str] = &[
    "Behind",
    "Harvesting",
    "Planting",
    "SurroundedBy",
    "Trampling",
    "Eating",
];

const FLORA: &[&str] = &[
    "Crabgrass",
    "PoisonOak",
    "Roses",
    "Shrubs",
    "Strawberries",
    "Sunflowers",
    "Trees",
    "Wheat",
    "Bamboo",
    "Amaranth",
    "Kelp",
    "PricklyPear",
];

const NAME_LISTS: &[&[&str]] = &[PREFIXES, DIGITS, MATERIALS, CREATURES, LINKERS, FLORA];

/// Seed for a batch's name: its id plus the CRC32 of the site's web root,
/// so two deployments walk different sequences.
pub fn name_seed(batch_id: i64, webroot: &str) -> u32 {
    let checksum = crc32fast::hash(webroot.as_bytes());
    (batch_id as u32).wrapping_add(checksum)
}

/// Returns the name for the given sequence number.
pub fn random_batch_name(seq: u32) -> String {
    let iterations = NAME_LISTS.iter().map(|l| l.len()).max().unwrap_or(1) as u32;
    let seed_plus = seq / iterations;
    let seq = seq % iterations;

    let mut rng = ChaCha8Rng::seed_from_u64(NAME_SEED + u64::from(seed_plus));
    NAME_LISTS
        .iter()
        .map(|list| {
            let mut shuffled = list.to_vec();
            shuffled.shuffle(&mut rng);
            shuffled[seq as usize % shuffled.len()]
        })
        .collect()
}
