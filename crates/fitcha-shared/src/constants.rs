/// Application name
pub const APP_NAME: &str = "Fitcha";

/// Counters above this value are displayed as `"{BADGE_CAP}+"`.
pub const BADGE_CAP: i64 = 9;

/// Notifications fetched per snapshot
pub const NOTIFICATION_PAGE_SIZE: u32 = 20;

/// Court suggestions fetched when a session enters court selection
pub const COURT_SUGGESTION_LIMIT: u32 = 10;

/// Realtime socket heartbeat interval in seconds
pub const HEARTBEAT_SECS: u64 = 25;

/// Default HTTP request timeout in seconds
pub const REQUEST_TIMEOUT_SECS: u64 = 15;

/// Prefix of every realtime channel topic
pub const TOPIC_PREFIX: &str = "realtime:";

/// Storage bucket holding profile pictures
pub const AVATAR_BUCKET: &str = "avatars";

// Tables
pub const TABLE_MESSAGES: &str = "messages";
pub const TABLE_SESSION_CHAT_MESSAGES: &str = "session_chat_messages";
pub const TABLE_GAME_SESSIONS: &str = "game_sessions";
pub const TABLE_NOTIFICATIONS: &str = "notifications";
pub const TABLE_FRIENDSHIPS: &str = "friendships";
pub const TABLE_GAME_REQUESTS: &str = "game_requests";
pub const TABLE_COURTS: &str = "courts";

// Remote procedures
pub const RPC_USER_CONVERSATIONS: &str = "get_user_conversations";
pub const RPC_CONVERSATION_MESSAGES: &str = "get_conversation_messages";
pub const RPC_UNREAD_CONVERSATION_COUNT: &str = "get_unread_conversation_count";
pub const RPC_FIND_OR_CREATE_CONVERSATION: &str = "find_or_create_conversation";
pub const RPC_UNREAD_NOTIFICATIONS_COUNT: &str = "get_unread_notifications_count";
pub const RPC_MARK_NOTIFICATIONS_READ: &str = "mark_notifications_as_read";
pub const RPC_USER_ACTIVE_SESSIONS: &str = "get_user_active_sessions";
pub const RPC_SUGGEST_COURTS: &str = "suggest_courts_for_session";
pub const RPC_FRIENDSHIP_STATUS: &str = "get_friendship_status";
pub const RPC_USER_FRIENDS: &str = "get_user_friends";
pub const RPC_PENDING_FRIEND_REQUESTS: &str = "get_pending_friend_requests";
pub const RPC_SEARCH_PLAYERS: &str = "search_players";
pub const RPC_SEARCH_COURTS: &str = "search_courts";
