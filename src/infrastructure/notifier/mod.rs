pub mod change_notifier;
pub mod echo_suppressor;

pub use change_notifier::ChangeNotifier;
pub use echo_suppressor::EchoSuppressor;
