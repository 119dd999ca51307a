// Fixed reply strings shared by the server and clients.
//
// Every processed line produces exactly one reply line. Handlers produce their
// own reply text; these constants cover the replies the session itself emits.

/// Reply to a line that does not match `name(...)`.
pub const WRONG_FORMAT: &str = "Wrong format";

/// Reply to a well-formed line naming an unregistered command.
pub const FAIL: &str = "Fail";

/// Acknowledgement for handlers that perform a side effect and have no value
/// to return.
pub const SUCCESS: &str = "Success";
