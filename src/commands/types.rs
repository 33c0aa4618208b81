//! Commands a user can issue in a comment.

/// One slash command found in a comment body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `/ok-to-test`: mark an untrusted PR as safe to test.
    OkToTest,
    /// `/test all`
    TestAll,
    /// `/test <job>`; holds the full command line for matching against
    /// each presubmit's trigger.
    Test(String),
    /// `/retest`: rerun what failed or never ran.
    Retest,
    /// `/override <context>...`
    Override(Vec<String>),
    Lgtm,
    LgtmCancel,
}

impl Command {
    /// Commands that ask the trigger to run presubmits.
    pub fn requests_tests(&self) -> bool {
        matches!(
            self,
            Command::OkToTest | Command::TestAll | Command::Test(_) | Command::Retest
        )
    }
}
