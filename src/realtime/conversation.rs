/// Derives the channel id for a two-party conversation by sorting the
/// participant ids lexicographically and joining them with an underscore.
/// Symmetric: both participants always land in the same channel no matter
/// who initiates.
pub fn conversation_id_for(user_a: &str, user_b: &str) -> String {
    let (first, second) = if user_a <= user_b {
        (user_a, user_b)
    } else {
        (user_b, user_a)
    };
    format!("{}_{}", first, second)
}

/// The personal channel a connection joins when it identifies. Used for
/// notifications independent of which conversation is open.
pub fn personal_room(user_id: &str) -> String {
    format!("user_{}", user_id)
}
