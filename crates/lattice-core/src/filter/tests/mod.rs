// Filter test module
#[cfg(test)]
mod ldap_tests;
