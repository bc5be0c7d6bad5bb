//! Privilege dropping after sockets are bound (`original_source/main.c`'s `privilege_drop`).

#[cfg(target_family = "unix")]
pub fn drop_to(user: &str, keep_root: bool, quiet: bool) -> utils::error::Result {
	use std::ffi::CString;

	if unsafe { libc::geteuid() } != 0 {
		return Ok(());
	}

	if keep_root {
		if !quiet {
			eprintln!("Running as root. This is dangerous; it is recommended to supply --drop-user instead of --root.");
		}

		return Ok(());
	}

	let Ok(cname) = CString::new(user) else {
		log::error!("invalid drop-user name: {user}");
		return Err(());
	};

	let passwd = unsafe { libc::getpwnam(cname.as_ptr()) };

	if passwd.is_null() || unsafe { libc::setuid((*passwd).pw_uid) } != 0 {
		log::error!(
			"privileges could not be dropped to \"{user}\"; for security reasons this program only runs as \
			 root when given --root, which is not recommended"
		);
		return Err(());
	}

	if !quiet {
		eprintln!("Privileges have been dropped to \"{user}\" for security reasons.");
	}

	Ok(())
}

#[cfg(not(target_family = "unix"))]
pub fn drop_to(_user: &str, _keep_root: bool, _quiet: bool) -> utils::error::Result {
	Ok(())
}
