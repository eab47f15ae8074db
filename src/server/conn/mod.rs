pub(crate) mod listener;
