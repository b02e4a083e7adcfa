pub const MAX_NAME_LEN: usize = 256;
pub const MAX_MEMBERS_PER_CLUB: usize = 10_000;
pub const MAX_SUBTEAMS_PER_CLUB: usize = 256;
pub const MAX_EVENTS_PER_DIVISION: usize = 512;
pub const MAX_DIVISIONS: usize = 64;
pub const MAX_CLUBS: usize = 10_000;
/// Upper bound on a configured subteam headcount.
pub const MAX_HEADCOUNT: u32 = 1_000;
