//! Mapping from import names to installable distributions.

/// Import names whose PyPI distribution is named differently.
const DISTRIBUTIONS: &[(&str, &str)] = &[
    ("cv2", "opencv-python"),
    ("PIL", "Pillow"),
    ("skimage", "scikit-image"),
    ("sklearn", "scikit-learn"),
    ("yaml", "PyYAML"),
    ("bs4", "beautifulsoup4"),
    ("fitz", "PyMuPDF"),
    ("Crypto", "pycryptodome"),
    ("dateutil", "python-dateutil"),
    ("magic", "python-magic"),
    ("docx", "python-docx"),
    ("pptx", "python-pptx"),
];

/// Distribution that provides `import_name`; identity when not known.
pub fn distribution_for(import_name: &str) -> &str {
    let root = import_name.split('.').next().unwrap_or(import_name);
    DISTRIBUTIONS
        .iter()
        .find(|(import, _)| *import == root)
        .map(|(_, dist)| *dist)
        .unwrap_or(root)
}

/// Command line that installs `package` into `interpreter`'s environment.
pub fn install_command(interpreter: &str, package: &str) -> Vec<String> {
    vec![
        interpreter.to_string(),
        "-m".to_string(),
        "pip".to_string(),
        "install".to_string(),
        distribution_for(package).to_string(),
    ]
}

/// Default interpreter name for the current platform.
pub fn default_interpreter() -> &'static str {
    if cfg!(windows) {
        "python"
    } else {
        "python3"
    }
}
