mod tests_separator;
