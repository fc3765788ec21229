//! Behavioural scenarios for running commands in the guest.

mod run;
