//! Test data constants
//!
//! Every test catalog contains the same movies, each backed by a body of
//! `MOVIE_SIZE_BYTES` served by the scripted transfer client.

#![allow(dead_code)]

pub const MOVIE_1_ID: &str = "m1";
pub const MOVIE_2_ID: &str = "m2";
pub const MOVIE_3_ID: &str = "m3";
pub const MOVIE_4_ID: &str = "m4";

pub const ALL_MOVIE_IDS: [&str; 4] = [MOVIE_1_ID, MOVIE_2_ID, MOVIE_3_ID, MOVIE_4_ID];

pub const NONEXISTENT_MOVIE_ID: &str = "does-not-exist";

/// Size of every test movie. One "cache unit".
pub const MOVIE_SIZE_BYTES: usize = 16 * 1024;

/// Chunk size used both by the scripted client and the fetch adapter.
pub const TEST_CHUNK_SIZE: usize = 4 * 1024;

pub const MP4_CONTENT_TYPE: &str = "video/mp4";

pub fn remote_location(movie_id: &str) -> String {
    format!("library/{}.mp4", movie_id)
}

/// A body that sniffs as MP4, with a per-movie fill byte so ranges from
/// different movies are distinguishable.
pub fn movie_body(movie_id: &str) -> Vec<u8> {
    let fill = movie_id.bytes().fold(0u8, |acc, b| acc.wrapping_add(b));
    let mut body = vec![0x00, 0x00, 0x00, 0x18];
    body.extend_from_slice(b"ftypisom");
    body.extend_from_slice(&[0x00, 0x00, 0x02, 0x00]);
    body.extend_from_slice(b"isomiso2");
    body.resize(MOVIE_SIZE_BYTES, fill);
    body
}
