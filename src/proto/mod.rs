pub(crate) mod h1;
