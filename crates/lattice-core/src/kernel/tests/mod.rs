#[cfg(test)]
mod framework_tests;
