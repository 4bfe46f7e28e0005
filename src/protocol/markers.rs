//! Fixed strings exchanged with sclang
//!
//! sclang has no request framing. Everything the bridge needs to recognize
//! in its output is either printed by the interpreter itself (the startup
//! banner, `ERROR:` lines) or injected by us as a literal that the
//! interpreter echoes back through `postln`.

/// Printed by sclang once the class library is compiled and it accepts input
pub const INTERPRETER_BANNER: &str = "Welcome to SuperCollider";

/// Posted by the boot command once the audio server is up
pub const SERVER_READY: &str = "SERVER_READY";

/// Posted by the runtime library once it finished (re)initializing
pub const RUNTIME_READY: &str = "CC_READY";

/// Opens the response span of one evaluation
pub const BEGIN_MARKER: &str = ">>>BEGIN>>>";

/// Closes the response span of one evaluation
pub const END_MARKER: &str = "<<<END<<<";

/// Start of every interpreter-reported error line
pub const ERROR_PREFIX: &str = "ERROR:";

/// Response text for an evaluation whose span was empty
pub const EMPTY_RESPONSE: &str = "OK";

/// Starts the audio server and posts [`SERVER_READY`] when it is running
pub const BOOT_COMMAND: &str = "s.waitForBoot { \"SERVER_READY\".postln };";

/// Asks sclang to stop its servers and exit
pub const TERMINATE_COMMAND: &str = "Server.quitAll; 0.exit;";

/// Interrupts all running sound (Cmd-Period in the IDE)
pub const STOP_COMMAND: &str = "CmdPeriod.run;";

/// Frees every node on the default server
pub const FREE_ALL_COMMAND: &str = "s.freeAll;";

/// Reboots the default server without restarting the interpreter
pub const REBOOT_COMMAND: &str = "s.reboot;";

/// Wrap user code so its printed value lands between the two markers.
///
/// The code sits on its own lines inside the parentheses so a trailing `//`
/// comment cannot swallow the closing parenthesis; the line is flattened
/// before it is written.
pub fn wrap_code(code: &str) -> String {
    format!(
        "\"{}\".postln; (\n{}\n).value.postln; \"{}\".postln;",
        BEGIN_MARKER, code, END_MARKER
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flatten::flatten;

    #[test]
    fn test_wrap_code_contains_markers_in_order() {
        let wrapped = wrap_code("1 + 1");
        let begin = wrapped.find(BEGIN_MARKER).unwrap();
        let code = wrapped.find("1 + 1").unwrap();
        let end = wrapped.find(END_MARKER).unwrap();
        assert!(begin < code && code < end);
    }

    #[test]
    fn test_wrapped_trailing_comment_does_not_eat_markers() {
        let line = flatten(&wrap_code("1 + 1 // add"));
        assert_eq!(
            line,
            "\">>>BEGIN>>>\".postln; ( 1 + 1 ).value.postln; \"<<<END<<<\".postln;"
        );
    }

    #[test]
    fn test_boot_command_posts_server_ready() {
        assert!(BOOT_COMMAND.contains(SERVER_READY));
    }
}
