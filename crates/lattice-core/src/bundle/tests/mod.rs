#[cfg(test)]
mod lifecycle_tests;
#[cfg(test)]
mod manifest_tests;
